//! Allowlists of endpoints and views that never carry or need a credential.
//!
//! Pattern syntax: an optional HTTP method, then a `/`-separated path.
//! `*` matches exactly one segment; a trailing `**` matches whatever is left,
//! including nothing. Query strings and trailing slashes are ignored.
//!
//! ```text
//! POST /auth/login
//! GET /catalog/**
//! /public/*/preview
//! ```

use reqwest::Method;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
    Rest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    method: Option<Method>,
    segments: Vec<Segment>,
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    let path = path.split(['?', '#']).next().unwrap_or("");
    path.split('/').filter(|s| !s.is_empty())
}

impl RoutePattern {
    pub fn parse(pattern: &str) -> Option<Self> {
        let pattern = pattern.trim();
        let (method, path) = match pattern.split_once(char::is_whitespace) {
            Some((method, path)) => {
                let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes()).ok()?;
                (Some(method), path.trim())
            }
            None => (None, pattern),
        };
        if !path.starts_with('/') {
            return None;
        }

        let raw: Vec<&str> = split_path(path).collect();
        let mut segments = Vec::with_capacity(raw.len());
        for (i, segment) in raw.iter().enumerate() {
            segments.push(match *segment {
                "**" if i + 1 == raw.len() => Segment::Rest,
                "**" => return None,
                "*" => Segment::Any,
                literal => Segment::Literal(literal.to_string()),
            });
        }
        Some(Self { method, segments })
    }

    pub fn matches(&self, method: Option<&Method>, path: &str) -> bool {
        if let (Some(expected), Some(actual)) = (&self.method, method) {
            if expected != actual {
                return false;
            }
        }

        let mut parts = split_path(path);
        for segment in &self.segments {
            match segment {
                Segment::Rest => return true,
                Segment::Any => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(literal) => {
                    if parts.next() != Some(literal.as_str()) {
                        return false;
                    }
                }
            }
        }
        parts.next().is_none()
    }
}

/// Immutable set of public patterns, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct PublicRoutes {
    patterns: Vec<RoutePattern>,
}

impl PublicRoutes {
    /// Build from pattern strings. Unparseable patterns are skipped and
    /// returned so the caller can report them.
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> (Self, Vec<String>) {
        let mut parsed = Vec::new();
        let mut rejected = Vec::new();
        for pattern in patterns {
            match RoutePattern::parse(pattern.as_ref()) {
                Some(p) => parsed.push(p),
                None => rejected.push(pattern.as_ref().to_string()),
            }
        }
        (Self { patterns: parsed }, rejected)
    }

    pub fn is_public(&self, method: &Method, path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(Some(method), path))
    }

    /// Match a UI location. Method constraints do not apply to views.
    pub fn is_public_view(&self, location: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(None, location))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routes(patterns: &[&str]) -> PublicRoutes {
        let (routes, rejected) = PublicRoutes::from_patterns(patterns);
        assert!(rejected.is_empty(), "rejected: {:?}", rejected);
        routes
    }

    #[test]
    fn test_literal_match() {
        let routes = routes(&["POST /auth/login"]);
        assert!(routes.is_public(&Method::POST, "/auth/login"));
        assert!(routes.is_public(&Method::POST, "/auth/login/"));
        assert!(routes.is_public(&Method::POST, "/auth/login?next=%2F"));
        assert!(!routes.is_public(&Method::GET, "/auth/login"));
        assert!(!routes.is_public(&Method::POST, "/auth/login/extra"));
        assert!(!routes.is_public(&Method::POST, "/auth"));
    }

    #[test]
    fn test_wildcards() {
        let routes = routes(&["GET /catalog/**", "/public/*/preview"]);
        assert!(routes.is_public(&Method::GET, "/catalog"));
        assert!(routes.is_public(&Method::GET, "/catalog/items/42"));
        assert!(!routes.is_public(&Method::DELETE, "/catalog/items/42"));

        assert!(routes.is_public(&Method::GET, "/public/abc/preview"));
        assert!(routes.is_public(&Method::PUT, "/public/abc/preview"));
        assert!(!routes.is_public(&Method::GET, "/public/preview"));
        assert!(!routes.is_public(&Method::GET, "/public/a/b/preview"));
    }

    #[test]
    fn test_lowercase_method() {
        let routes = routes(&["post /leads/public"]);
        assert!(routes.is_public(&Method::POST, "/leads/public"));
    }

    #[test]
    fn test_invalid_patterns_are_rejected() {
        let (routes, rejected) =
            PublicRoutes::from_patterns(&["no-leading-slash", "/a/**/b", "/ok"]);
        assert_eq!(routes.len(), 1);
        assert_eq!(rejected, vec!["no-leading-slash", "/a/**/b"]);
    }

    #[test]
    fn test_views_ignore_methods() {
        let routes = routes(&["/login", "/public/**"]);
        assert!(routes.is_public_view("/login"));
        assert!(routes.is_public_view("/public/catalog"));
        assert!(!routes.is_public_view("/dashboard"));
        assert!(!PublicRoutes::default().is_public_view("/login"));
    }
}

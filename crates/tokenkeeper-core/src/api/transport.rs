//! Outbound HTTP plumbing used by the request gate.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method, StatusCode};
use serde::de::DeserializeOwned;

use super::ApiError;

/// A request as the gate sees it: method, path relative to the API base, an
/// optional JSON body, and the bearer credential the gate decided to attach.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub bearer: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            bearer: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub(crate) fn with_bearer(&self, token: &str) -> Self {
        let mut request = self.clone();
        request.bearer = Some(token.to_string());
        request
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|e| {
            ApiError::InvalidResponse(format!(
                "{}: {}",
                e,
                ApiError::truncate_body(&self.body)
            ))
        })
    }
}

/// Sends requests. Returns `Err` only when no response was received; error
/// statuses come back as `Ok` for the gate to inspect.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError>;
}

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Share an existing connection pool.
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path))
            .header(header::ACCEPT, "application/json");
        if let Some(ref token) = request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(ApiResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_url_joining() {
        let transport = ReqwestTransport::with_client(Client::new(), "https://api.example.com/v1/");
        assert_eq!(transport.url("/leads"), "https://api.example.com/v1/leads");
        assert_eq!(transport.url("leads"), "https://api.example.com/v1/leads");
    }

    #[test]
    fn test_response_json() {
        #[derive(Deserialize)]
        struct Lead {
            id: u32,
        }

        let ok = ApiResponse::new(StatusCode::OK, r#"{"id":7}"#);
        assert_eq!(ok.json::<Lead>().unwrap().id, 7);

        let bad = ApiResponse::new(StatusCode::OK, "<html>");
        assert!(matches!(bad.json::<Lead>(), Err(ApiError::InvalidResponse(_))));
    }

    #[test]
    fn test_with_bearer_leaves_original_untouched() {
        let request = ApiRequest::get("/leads");
        let authorized = request.with_bearer("tok");
        assert_eq!(request.bearer, None);
        assert_eq!(authorized.bearer.as_deref(), Some("tok"));
        assert_eq!(authorized.path, "/leads");
    }
}

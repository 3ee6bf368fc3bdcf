//! Access credential inspection.
//!
//! Access credentials are JWTs. Only the payload is read, to learn when the
//! credential lapses; the signature is the server's business and is never
//! checked here. Anything that cannot be decoded is reported as expired so
//! callers always lean toward renewing rather than trusting a bad token.

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("token does not have three segments")]
    MissingPayload,

    #[error("payload is not valid base64: {0}")]
    Base64(String),

    #[error("payload is not valid JSON: {0}")]
    Json(String),

    #[error("payload has no usable exp claim")]
    InvalidExpiry,
}

/// Claims read from an access credential payload.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TokenClaims {
    pub expires_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    pub subject: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    exp: Option<serde_json::Number>,
    iat: Option<serde_json::Number>,
    sub: Option<String>,
}

fn numeric_date(value: &serde_json::Number) -> Option<DateTime<Utc>> {
    let secs = match value.as_i64() {
        Some(secs) => secs,
        None => {
            let secs = value.as_f64()?;
            if !secs.is_finite() {
                return None;
            }
            secs.floor() as i64
        }
    };
    DateTime::from_timestamp(secs, 0)
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, DecodeError> {
    let trimmed = segment.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
        .map_err(|e| DecodeError::Base64(e.to_string()))
}

/// Decode the payload claims of a token.
pub fn decode_claims(token: &str) -> Result<TokenClaims, DecodeError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) if !payload.is_empty() => payload,
        _ => return Err(DecodeError::MissingPayload),
    };

    let bytes = decode_segment(payload)?;
    let raw: RawClaims =
        serde_json::from_slice(&bytes).map_err(|e| DecodeError::Json(e.to_string()))?;

    let expires_at = raw
        .exp
        .as_ref()
        .and_then(numeric_date)
        .ok_or(DecodeError::InvalidExpiry)?;

    Ok(TokenClaims {
        expires_at,
        issued_at: raw.iat.as_ref().and_then(numeric_date),
        subject: raw.sub,
    })
}

/// Read the expiry timestamp of a token.
pub fn decode_expiry(token: &str) -> Result<DateTime<Utc>, DecodeError> {
    decode_claims(token).map(|claims| claims.expires_at)
}

/// True when the token has lapsed at `now`, or cannot be decoded.
pub fn is_expired(token: &str, now: DateTime<Utc>) -> bool {
    match decode_expiry(token) {
        Ok(expiry) => expiry <= now,
        Err(_) => true,
    }
}

/// True when the token lapses within `horizon` of `now`, or cannot be decoded.
pub fn is_expiring_soon(token: &str, now: DateTime<Utc>, horizon: Duration) -> bool {
    match decode_expiry(token) {
        Ok(expiry) => expiry - now < horizon,
        Err(_) => true,
    }
}

/// Build an unsigned token carrying the given claims. Test helper.
#[cfg(test)]
pub(crate) fn encode_unsigned(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.signature", header, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn token_expiring_in(secs: i64) -> String {
        encode_unsigned(&json!({ "sub": "42", "iat": 1_699_999_000, "exp": 1_700_000_000 + secs }))
    }

    #[test]
    fn test_decode_claims() {
        let claims = decode_claims(&token_expiring_in(60)).unwrap();
        assert_eq!(claims.expires_at, now() + Duration::seconds(60));
        assert_eq!(claims.issued_at, DateTime::from_timestamp(1_699_999_000, 0));
        assert_eq!(claims.subject.as_deref(), Some("42"));
    }

    #[test]
    fn test_decode_fractional_and_padded_payload() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"exp":1700000060.75}"#);
        let token = format!("h.{}.s", payload);
        assert_eq!(decode_expiry(&token).unwrap(), now() + Duration::seconds(60));
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode_expiry(""), Err(DecodeError::MissingPayload));
        assert_eq!(decode_expiry("only.two"), Err(DecodeError::MissingPayload));
        assert_eq!(decode_expiry("a..c"), Err(DecodeError::MissingPayload));
        assert_eq!(decode_expiry("a.b.c.d"), Err(DecodeError::MissingPayload));
        assert!(matches!(decode_expiry("a.!!!.c"), Err(DecodeError::Base64(_))));

        let not_json = URL_SAFE_NO_PAD.encode("not json");
        assert!(matches!(
            decode_expiry(&format!("a.{}.c", not_json)),
            Err(DecodeError::Json(_))
        ));

        let no_exp = encode_unsigned(&json!({ "sub": "42" }));
        assert_eq!(decode_expiry(&no_exp), Err(DecodeError::InvalidExpiry));

        let string_exp = encode_unsigned(&json!({ "exp": "tomorrow" }));
        assert!(decode_expiry(&string_exp).is_err());
    }

    #[test]
    fn test_is_expired() {
        assert!(!is_expired(&token_expiring_in(1), now()));
        assert!(is_expired(&token_expiring_in(0), now()));
        assert!(is_expired(&token_expiring_in(-30), now()));
    }

    #[test]
    fn test_malformed_tokens_are_expired() {
        let valid = token_expiring_in(3600);
        let truncated = &valid[..valid.len() / 2];
        for token in ["", "garbage", "a.b", "a.%%%.c", truncated] {
            assert!(is_expired(token, now()), "{:?} should be expired", token);
            assert!(is_expiring_soon(token, now(), Duration::minutes(5)));
        }
    }

    #[test]
    fn test_is_expiring_soon() {
        let horizon = Duration::minutes(5);
        assert!(is_expiring_soon(&token_expiring_in(60), now(), horizon));
        assert!(is_expiring_soon(&token_expiring_in(299), now(), horizon));
        assert!(!is_expiring_soon(&token_expiring_in(300), now(), horizon));
        assert!(!is_expiring_soon(&token_expiring_in(3600), now(), horizon));
    }
}

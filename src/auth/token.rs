//! Bearer token extraction and unverified claim parsing.
//!
//! Parsing here never checks a signature. Callers that need trust must run
//! the token through a [`TokenVerifier`](super::TokenVerifier) first.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde_json::{Map, Value};

use crate::error::GatewayError;

/// Claims of a parsed token, keyed by claim name.
pub type Claims = Map<String, Value>;

/// Extract the raw token from an `Authorization: <scheme> <token>` header.
///
/// The header must split into exactly two space-separated parts; the scheme
/// itself is not inspected.
pub fn extract_bearer(headers: &HeaderMap) -> Result<&str, GatewayError> {
    let value = match headers.get(AUTHORIZATION) {
        Some(value) if !value.is_empty() => value,
        _ => return Err(GatewayError::NoAuthHeader),
    };

    let value = value
        .to_str()
        .map_err(|_| GatewayError::MalformedAuthHeader)?;

    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_scheme), Some(token), None) => Ok(token),
        _ => Err(GatewayError::MalformedAuthHeader),
    }
}

/// Decode the payload segment of a compact JWS without verifying it.
pub fn parse_unverified(raw_token: &str) -> Result<Claims, GatewayError> {
    let mut segments = raw_token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(GatewayError::InvalidToken("token is not a compact JWS".into())),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| GatewayError::InvalidToken(format!("payload is not base64url: {e}")))?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(claims)) => Ok(claims),
        Ok(_) => Err(GatewayError::InvalidToken("payload is not a JSON object".into())),
        Err(e) => Err(GatewayError::InvalidToken(format!("payload is not JSON: {e}"))),
    }
}

/// Non-empty `sub` claim of the token.
pub fn subject(claims: &Claims) -> Result<&str, GatewayError> {
    match claims.get("sub") {
        Some(Value::String(sub)) if !sub.is_empty() => Ok(sub),
        _ => Err(GatewayError::MissingSubClaim),
    }
}

/// Build an unsigned token carrying `claims`, for tests that only exercise
/// unverified parsing.
#[cfg(test)]
pub(crate) fn unsigned_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer(&headers_with("Bearer token")).unwrap(), "token");
        assert!(matches!(
            extract_bearer(&HeaderMap::new()),
            Err(GatewayError::NoAuthHeader)
        ));
        assert!(matches!(
            extract_bearer(&headers_with("token")),
            Err(GatewayError::MalformedAuthHeader)
        ));
        assert!(matches!(
            extract_bearer(&headers_with("Bearer a b")),
            Err(GatewayError::MalformedAuthHeader)
        ));
    }

    #[test]
    fn test_extract_bearer_empty_token_is_passed_through() {
        // "Bearer " splits into two parts, the second one empty.
        assert_eq!(extract_bearer(&headers_with("Bearer ")).unwrap(), "");
    }

    #[test]
    fn test_parse_unverified() {
        let token = unsigned_token(&json!({"sub": "id", "access": {"role": "user"}}));
        let claims = parse_unverified(&token).unwrap();
        assert_eq!(claims["sub"], "id");
        assert_eq!(claims["access"]["role"], "user");

        assert!(matches!(
            parse_unverified("not-a-token"),
            Err(GatewayError::InvalidToken(_))
        ));
        assert!(matches!(
            parse_unverified("a.!!!.c"),
            Err(GatewayError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_subject() {
        let claims = parse_unverified(&unsigned_token(&json!({"sub": "id"}))).unwrap();
        assert_eq!(subject(&claims).unwrap(), "id");

        let claims = parse_unverified(&unsigned_token(&json!({"iss": "issuer"}))).unwrap();
        assert!(matches!(subject(&claims), Err(GatewayError::MissingSubClaim)));

        let claims = parse_unverified(&unsigned_token(&json!({"sub": ""}))).unwrap();
        assert!(matches!(subject(&claims), Err(GatewayError::MissingSubClaim)));
    }
}

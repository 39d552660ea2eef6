//! Per-request failure taxonomy.
//!
//! Every stage of an endpoint pipeline reports rejection through
//! [`GatewayError`]. The variant decides the status code and the short public
//! reason written to the caller; the `Display` text is for logs only.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Failure raised while processing one inbound request.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("authorization header not found")]
    NoAuthHeader,

    #[error("authorization header malformed")]
    MalformedAuthHeader,

    #[error("token verification failed: {0}")]
    TokenVerificationFailed(String),

    #[error("token could not be parsed: {0}")]
    InvalidToken(String),

    #[error("provided token key not found in token")]
    ClaimNotFound,

    #[error("invalid claim")]
    InvalidClaim,

    #[error("can't cast token claim to provided type: {0}")]
    InvalidClaimType(&'static str),

    #[error("unsupported claim type {0:?}")]
    UnsupportedClaimType(String),

    #[error("sub claim is missing in token")]
    MissingSubClaim,

    #[error("role check failed")]
    RoleRejected,

    #[error("permission check failed")]
    PermissionRejected,

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("could not extract rate limiting key: {0}")]
    KeyExtractionFailed(Box<GatewayError>),

    #[error("request path does not start with prefix {0:?}")]
    BadUpstreamPrefix(String),

    #[error("could not build upstream request: {0}")]
    InvalidUpstreamRequest(String),

    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: u64 },

    #[error("request headers exceed {limit} bytes")]
    HeadersTooLarge { limit: usize },
}

impl GatewayError {
    /// HTTP status returned to the caller.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NoAuthHeader
            | GatewayError::MalformedAuthHeader
            | GatewayError::TokenVerificationFailed(_)
            | GatewayError::InvalidToken(_)
            | GatewayError::ClaimNotFound
            | GatewayError::InvalidClaim
            | GatewayError::InvalidClaimType(_)
            | GatewayError::UnsupportedClaimType(_)
            | GatewayError::MissingSubClaim
            | GatewayError::RoleRejected
            | GatewayError::PermissionRejected => StatusCode::UNAUTHORIZED,
            GatewayError::KeyExtractionFailed(_) => StatusCode::BAD_REQUEST,
            GatewayError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::HeadersTooLarge { .. } => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            GatewayError::BadUpstreamPrefix(_)
            | GatewayError::InvalidUpstreamRequest(_)
            | GatewayError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Short reason written in the response body. Never carries claim
    /// contents or verifier details.
    pub fn public_reason(&self) -> &'static str {
        match self {
            GatewayError::NoAuthHeader | GatewayError::MalformedAuthHeader => "missing token",
            GatewayError::TokenVerificationFailed(_) | GatewayError::InvalidToken(_) => {
                "invalid token"
            }
            GatewayError::RoleRejected => "invalid role",
            GatewayError::PermissionRejected => "invalid permission",
            GatewayError::ClaimNotFound
            | GatewayError::InvalidClaim
            | GatewayError::InvalidClaimType(_)
            | GatewayError::UnsupportedClaimType(_)
            | GatewayError::MissingSubClaim => "unauthorized",
            GatewayError::KeyExtractionFailed(_) => "Bad Request",
            GatewayError::RateLimitExceeded => "rate limit exceeded",
            GatewayError::BodyTooLarge { .. } => "request body too large",
            GatewayError::HeadersTooLarge { .. } => "headers too large",
            GatewayError::BadUpstreamPrefix(_)
            | GatewayError::InvalidUpstreamRequest(_)
            | GatewayError::UpstreamUnreachable(_) => "bad gateway",
        }
    }

    /// Label used for the rejection metric.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::NoAuthHeader => "no_auth_header",
            GatewayError::MalformedAuthHeader => "malformed_auth_header",
            GatewayError::TokenVerificationFailed(_) => "token_verification_failed",
            GatewayError::InvalidToken(_) => "invalid_token",
            GatewayError::ClaimNotFound => "claim_not_found",
            GatewayError::InvalidClaim => "invalid_claim",
            GatewayError::InvalidClaimType(_) => "invalid_claim_type",
            GatewayError::UnsupportedClaimType(_) => "unsupported_claim_type",
            GatewayError::MissingSubClaim => "missing_sub_claim",
            GatewayError::RoleRejected => "role_rejected",
            GatewayError::PermissionRejected => "permission_rejected",
            GatewayError::RateLimitExceeded => "rate_limit_exceeded",
            GatewayError::KeyExtractionFailed(_) => "key_extraction_failed",
            GatewayError::BadUpstreamPrefix(_) => "bad_upstream_prefix",
            GatewayError::InvalidUpstreamRequest(_) => "invalid_upstream_request",
            GatewayError::UpstreamUnreachable(_) => "upstream_unreachable",
            GatewayError::BodyTooLarge { .. } => "body_too_large",
            GatewayError::HeadersTooLarge { .. } => "headers_too_large",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.public_reason())).into_response()
    }
}

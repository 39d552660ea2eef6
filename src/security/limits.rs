//! Request size limits.
//!
//! # Design Decisions
//! - A declared `Content-Length` over the limit is rejected before any byte
//!   of the body is read
//! - Bodies without a usable length are wrapped in a counting stream; an
//!   overrun surfaces while forwarding and is reported as 413 as well
//! - Header size counts name and value bytes of every entry

use axum::{
    body::Body,
    http::{header::CONTENT_LENGTH, HeaderMap, Request},
};
use http_body_util::{LengthLimitError, Limited};

use crate::error::GatewayError;

/// Body limit applied to a request, kept in its extensions so a later
/// stream overrun can be reported with the right limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyLimit(pub u64);

/// Enforce `limit` bytes on the request body.
pub fn limit_body(request: Request<Body>, limit: u64) -> Result<Request<Body>, GatewayError> {
    if let Some(declared) = content_length(request.headers()) {
        if declared > limit {
            return Err(GatewayError::BodyTooLarge { limit });
        }
    }

    let (mut parts, body) = request.into_parts();
    parts.extensions.insert(BodyLimit(limit));
    let max = usize::try_from(limit).unwrap_or(usize::MAX);
    Ok(Request::from_parts(parts, Body::new(Limited::new(body, max))))
}

/// Enforce `limit` bytes over all header names and values.
pub fn check_header_size(headers: &HeaderMap, limit: usize) -> Result<(), GatewayError> {
    let mut size = 0usize;
    for (name, value) in headers {
        size += name.as_str().len() + value.len();
        if size > limit {
            return Err(GatewayError::HeadersTooLarge { limit });
        }
    }
    Ok(())
}

/// Whether `err`, or anything it wraps, is a body length overrun.
pub fn is_body_overrun(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if err.is::<LengthLimitError>() {
            return true;
        }
        current = err.source();
    }
    false
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

//! Fixed-window rate limiting keyed per caller.
//!
//! A counter resets once more than `window` has elapsed since the first call
//! of its window. Bursts straddling a boundary may therefore admit up to
//! twice `max_count` calls in less than one window.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::auth::token::{extract_bearer, parse_unverified, subject};
use crate::error::GatewayError;

/// Key shared by every caller under the global strategy.
pub const GLOBAL_KEY: &str = "global";

/// How callers are told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LimitBy {
    /// One counter for the whole endpoint.
    #[default]
    Global,
    /// One counter per `sub` claim of the bearer token.
    SubClaim,
}

impl From<String> for LimitBy {
    fn from(value: String) -> Self {
        match value.as_str() {
            "sub_claim" => LimitBy::SubClaim,
            _ => LimitBy::Global,
        }
    }
}

impl From<LimitBy> for String {
    fn from(value: LimitBy) -> Self {
        match value {
            LimitBy::Global => "global".to_string(),
            LimitBy::SubClaim => "sub_claim".to_string(),
        }
    }
}

impl LimitBy {
    /// Derive the counter key for a request.
    ///
    /// The subject strategy reads the token without verifying it.
    pub fn extract_key(&self, headers: &HeaderMap) -> Result<String, GatewayError> {
        match self {
            LimitBy::Global => Ok(GLOBAL_KEY.to_string()),
            LimitBy::SubClaim => {
                let raw_token = extract_bearer(headers)?;
                let claims = parse_unverified(raw_token)?;
                subject(&claims).map(str::to_string)
            }
        }
    }
}

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// Counter map guarded by a single lock.
#[derive(Debug)]
pub struct FixedWindowCounter {
    window: Duration,
    max_count: u32,
    counters: Mutex<HashMap<String, Window>>,
}

impl FixedWindowCounter {
    pub fn new(window: Duration, max_count: u32) -> Self {
        Self {
            window,
            max_count,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Admit and count one call for `key`.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    pub(crate) fn allow_at(&self, key: &str, now: Instant) -> bool {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);

        match counters.get_mut(key) {
            Some(window) if now.saturating_duration_since(window.started) <= self.window => {
                if window.count < self.max_count {
                    window.count += 1;
                    true
                } else {
                    false
                }
            }
            Some(window) => {
                *window = Window { started: now, count: 1 };
                true
            }
            None => {
                counters.insert(key.to_string(), Window { started: now, count: 1 });
                true
            }
        }
    }

    /// Drop counters whose window has elapsed. Such entries would be reset on
    /// their next access anyway, so admission decisions are unchanged.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub(crate) fn purge_expired_at(&self, now: Instant) -> usize {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let before = counters.len();
        counters.retain(|_, window| now.saturating_duration_since(window.started) <= self.window);
        before - counters.len()
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_count(&self) -> u32 {
        self.max_count
    }
}

/// Per-endpoint limiter: key strategy plus its own counter map.
#[derive(Debug)]
pub struct RateLimiter {
    limit_by: LimitBy,
    counter: FixedWindowCounter,
}

impl RateLimiter {
    pub fn new(limit_by: LimitBy, window: Duration, max_count: u32) -> Self {
        Self {
            limit_by,
            counter: FixedWindowCounter::new(window, max_count),
        }
    }

    /// Count the request against its caller's budget.
    pub fn check(&self, headers: &HeaderMap) -> Result<(), GatewayError> {
        let key = self
            .limit_by
            .extract_key(headers)
            .map_err(|e| GatewayError::KeyExtractionFailed(Box::new(e)))?;

        if self.counter.allow(&key) {
            Ok(())
        } else {
            Err(GatewayError::RateLimitExceeded)
        }
    }

    pub fn limit_by(&self) -> LimitBy {
        self.limit_by
    }

    pub fn counter(&self) -> &FixedWindowCounter {
        &self.counter
    }
}

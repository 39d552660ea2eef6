//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Request admitted by auth:
//!     → limits.rs (body size, header size)
//!     → rate_limit.rs (fixed-window budget per caller key)
//!     → Pass to forwarder
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any security check failure
//! - Limiter state is owned by one endpoint, never shared process-wide

pub mod limits;
pub mod rate_limit;

pub use limits::{check_header_size, limit_body, BodyLimit};
pub use rate_limit::{FixedWindowCounter, LimitBy, RateLimiter};

//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipelines and server produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID is attached to the request span by the server
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;

//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): responses by service, status
//! - `gateway_rejections_total` (counter): requests stopped by a pipeline
//!   stage, by stage and reason
//! - `gateway_upstream_duration_seconds` (histogram): upstream round trip
//!   by service
//! - `gateway_rate_limit_keys` (gauge): keys tracked by each endpoint's
//!   limiter, by service and endpoint
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the global recorder and serve `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(service: &str, status: u16) {
    counter!(
        "gateway_requests_total",
        "service" => service.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_rejection(stage: &'static str, reason: &'static str) {
    counter!("gateway_rejections_total", "stage" => stage, "reason" => reason).increment(1);
}

pub fn record_upstream_duration(service: &str, started: Instant) {
    histogram!("gateway_upstream_duration_seconds", "service" => service.to_string())
        .record(started.elapsed().as_secs_f64());
}

pub fn record_rate_limit_keys(service: &str, endpoint: &str, count: usize) {
    gauge!(
        "gateway_rate_limit_keys",
        "service" => service.to_string(),
        "endpoint" => endpoint.to_string()
    )
    .set(count as f64);
}

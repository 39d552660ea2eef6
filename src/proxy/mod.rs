//! Upstream forwarding.

pub mod forward;

pub use forward::{upstream_client, Forwarder, UpstreamClient};

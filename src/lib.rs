//! API gateway library.
//!
//! Terminates HTTP requests, runs each through the check pipeline of its
//! endpoint and forwards admitted ones to the upstream service.

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod proxy;
pub mod security;
pub mod service;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;

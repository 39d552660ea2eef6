//! Startup orchestration.
//!
//! # Responsibilities
//! - Discover identity providers and build every service
//! - Assemble the router from the endpoint pipelines
//! - Bind the listener and serve until a shutdown signal
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Services initialize in order, not concurrently
//! - The listener binds last (traffic only when ready)

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::auth::DiscoveryError;
use crate::config::{ConfigError, GatewayConfig};
use crate::http::GatewayServer;
use crate::lifecycle::{signals, Shutdown};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("identity provider discovery failed for service {service:?}: {source}")]
    Discovery {
        service: String,
        source: DiscoveryError,
    },

    #[error("cannot register route: {0}")]
    Route(String),

    #[error("invalid CORS settings: {0}")]
    Cors(String),

    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Build the gateway from `config` and serve on `0.0.0.0:<port>` until
/// SIGINT or SIGTERM.
pub async fn run(config: GatewayConfig) -> Result<(), StartupError> {
    let server = GatewayServer::from_config(&config).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;

    let shutdown = Shutdown::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        signals::wait_for_signal().await;
        tracing::info!(listeners = signal.receiver_count(), "Shutdown signal received");
        signal.trigger();
    });

    server.run(listener, shutdown.subscribe()).await
}

//! API gateway (v1)
//!
//! # Architecture Overview
//!
//! ```text
//!   Client Request
//!   ──────────────▶ router (method + prefix/path)
//!                      │
//!                      ▼
//!                   auth ─▶ body size ─▶ header size ─▶ rate limit
//!                                                          │
//!                                                          ▼
//!   Client Response                                     forwarder ─────▶ Upstream
//!   ◀──────────────────────────────────────────────────────┘             Service
//! ```

use std::path::PathBuf;

use clap::Parser;

use api_gateway::config::load_config;
use api_gateway::lifecycle::startup;
use api_gateway::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "api-gateway", version, about = "HTTP API gateway")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "GATEWAY_CONFIG", default_value = "/config/config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = load_config(&args.config)?;
    logging::init(&config.observability)?;

    tracing::info!(
        config = %args.config.display(),
        port = config.server.port,
        services = config.services.len(),
        "api-gateway v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    startup::run(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

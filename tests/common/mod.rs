//! Shared utilities for integration testing.

use std::net::SocketAddr;

use api_gateway::config::{load_config_from_str, GatewayConfig};
use api_gateway::{GatewayServer, Shutdown};
use axum::{
    extract::Request,
    response::Redirect,
    routing::{any, get},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Start an upstream that echoes method, path, query, headers and body as
/// JSON. `/redirect` answers with a 307 to `/elsewhere`.
pub async fn start_echo_upstream() -> SocketAddr {
    let app = Router::new()
        .route("/redirect", get(|| async { Redirect::temporary("/elsewhere") }))
        .fallback(any(echo));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn echo(request: Request) -> Json<Value> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    let headers: serde_json::Map<String, Value> = parts
        .headers
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v.to_str().unwrap_or_default())))
        .collect();

    Json(json!({
        "method": parts.method.as_str(),
        "path": parts.uri.path(),
        "query": parts.uri.query(),
        "headers": headers,
        "body": String::from_utf8_lossy(&body),
    }))
}

/// Parse a TOML config with no environment overrides.
pub fn config(raw: &str) -> GatewayConfig {
    load_config_from_str(raw, Vec::new()).unwrap()
}

/// Build the gateway from `config` and serve it on an ephemeral port.
pub async fn start_gateway(config: GatewayConfig) -> (SocketAddr, Shutdown) {
    let server = GatewayServer::from_config(&config).await.unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    tokio::spawn(async move {
        server.run(listener, signal).await.unwrap();
    });
    (addr, shutdown)
}

/// HTTP client that never follows redirects.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

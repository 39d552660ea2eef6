//! Relays admitted requests to an upstream service.
//!
//! # Responsibilities
//! - Strip the gateway prefix and rebase the path on the upstream URL
//! - Pass method, headers and body through unchanged
//! - Relay status, headers and a streamed body back, 3xx included
//!
//! # Design Decisions
//! - The hyper client never follows redirects
//! - No retries; every failure becomes a 502
//! - `Host` is left for the client to derive from the upstream URL

use axum::{
    body::Body,
    http::{header::HOST, Request, Response, Uri},
};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::error::GatewayError;
use crate::security::limits::{is_body_overrun, BodyLimit};

/// HTTP client shared by every forwarder.
pub type UpstreamClient = Client<HttpConnector, Body>;

pub fn upstream_client() -> UpstreamClient {
    Client::builder(TokioExecutor::new()).build(HttpConnector::new())
}

/// Forwards requests below `source_prefix` to `target_base`.
#[derive(Clone)]
pub struct Forwarder {
    client: UpstreamClient,
    source_prefix: String,
    target_base: String,
}

impl Forwarder {
    pub fn new(
        client: UpstreamClient,
        source_prefix: impl Into<String>,
        target_base: impl Into<String>,
    ) -> Self {
        Self {
            client,
            source_prefix: source_prefix.into(),
            target_base: target_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Upstream URI for an inbound one.
    pub fn target_uri(&self, inbound: &Uri) -> Result<Uri, GatewayError> {
        let stripped = inbound
            .path()
            .strip_prefix(self.source_prefix.as_str())
            .ok_or_else(|| GatewayError::BadUpstreamPrefix(self.source_prefix.clone()))?;

        let mut target = format!("{}{}", self.target_base, stripped);
        if let Some(query) = inbound.query().filter(|q| !q.is_empty()) {
            target.push('?');
            target.push_str(query);
        }

        target
            .parse()
            .map_err(|e| GatewayError::InvalidUpstreamRequest(format!("{target}: {e}")))
    }

    pub async fn forward(&self, request: Request<Body>) -> Result<Response<Body>, GatewayError> {
        let uri = self.target_uri(request.uri())?;
        let (parts, body) = request.into_parts();
        let body_limit = parts.extensions.get::<BodyLimit>().copied();

        let mut upstream = Request::builder().method(parts.method).uri(uri);
        if let Some(headers) = upstream.headers_mut() {
            for (name, value) in parts.headers.iter().filter(|(name, _)| **name != HOST) {
                headers.append(name.clone(), value.clone());
            }
        }
        let upstream = upstream
            .body(body)
            .map_err(|e| GatewayError::InvalidUpstreamRequest(e.to_string()))?;

        match self.client.request(upstream).await {
            Ok(response) => {
                let (parts, body): (_, Incoming) = response.into_parts();
                Ok(Response::from_parts(parts, Body::new(body)))
            }
            Err(e) => match body_limit {
                Some(BodyLimit(limit)) if is_body_overrun(&e) => {
                    Err(GatewayError::BodyTooLarge { limit })
                }
                _ => Err(GatewayError::UpstreamUnreachable(e.to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Request as AxumRequest,
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Redirect},
        routing::{any, get},
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::net::SocketAddr;

    async fn echo(request: AxumRequest) -> Json<Value> {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        let headers: Vec<(String, String)> = parts
            .headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        Json(json!({
            "method": parts.method.as_str(),
            "path": parts.uri.path(),
            "query": parts.uri.query(),
            "headers": headers,
            "body": String::from_utf8_lossy(&body),
        }))
    }

    async fn multi_header() -> impl IntoResponse {
        let mut headers = HeaderMap::new();
        headers.append("x-multi", "one".parse().unwrap());
        headers.append("x-multi", "two".parse().unwrap());
        (StatusCode::ACCEPTED, headers, "done")
    }

    async fn start_upstream() -> SocketAddr {
        let app = Router::new()
            .route("/redirect", get(|| async { Redirect::to("/elsewhere") }))
            .route("/multi", get(multi_header))
            .fallback(any(echo));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn json_body(response: Response<Body>) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_target_uri() {
        let forwarder = Forwarder::new(upstream_client(), "/service", "http://up");

        let uri: Uri = "/service/test?q=yes".parse().unwrap();
        assert_eq!(
            forwarder.target_uri(&uri).unwrap().to_string(),
            "http://up/test?q=yes"
        );

        let uri: Uri = "/service/test".parse().unwrap();
        assert_eq!(forwarder.target_uri(&uri).unwrap().to_string(), "http://up/test");

        let uri: Uri = "/other".parse().unwrap();
        assert!(matches!(
            forwarder.target_uri(&uri),
            Err(GatewayError::BadUpstreamPrefix(_))
        ));
    }

    #[test]
    fn test_target_uri_with_base_path() {
        let forwarder = Forwarder::new(upstream_client(), "", "http://up/api/");
        let uri: Uri = "/v1/items".parse().unwrap();
        assert_eq!(
            forwarder.target_uri(&uri).unwrap().to_string(),
            "http://up/api/v1/items"
        );
    }

    #[tokio::test]
    async fn test_forward_passes_request_through() {
        let addr = start_upstream().await;
        let forwarder = Forwarder::new(upstream_client(), "/service", format!("http://{addr}"));

        let request = Request::builder()
            .method("PUT")
            .uri("/service/items/7?verbose=1")
            .header("x-custom", "a")
            .header("host", "gateway.local")
            .body(Body::from("payload"))
            .unwrap();

        let response = forwarder.forward(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let echoed = json_body(response).await;
        assert_eq!(echoed["method"], "PUT");
        assert_eq!(echoed["path"], "/items/7");
        assert_eq!(echoed["query"], "verbose=1");
        assert_eq!(echoed["body"], "payload");

        let headers = echoed["headers"].as_array().unwrap();
        assert!(headers.contains(&json!(["x-custom", "a"])));
        assert!(headers.contains(&json!(["host", addr.to_string()])));
    }

    #[tokio::test]
    async fn test_forward_relays_redirects_and_headers() {
        let addr = start_upstream().await;
        let forwarder = Forwarder::new(upstream_client(), "", format!("http://{addr}"));

        let request = Request::get("/redirect").body(Body::empty()).unwrap();
        let response = forwarder.forward(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()["location"], "/elsewhere");

        let request = Request::get("/multi").body(Body::empty()).unwrap();
        let response = forwarder.forward(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let values: Vec<_> = response.headers().get_all("x-multi").iter().collect();
        assert_eq!(values, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_forward_unreachable_upstream() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let forwarder = Forwarder::new(upstream_client(), "", format!("http://{addr}"));
        let request = Request::get("/").body(Body::empty()).unwrap();
        let err = forwarder.forward(request).await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamUnreachable(_)));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }
}

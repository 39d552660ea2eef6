//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router from every endpoint pipeline
//! - Wire up middleware (CORS, request ID, tracing, timeout)
//! - Serve on a listener with graceful shutdown
//! - Sweep expired rate-limit counters in the background

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request},
    Router,
};
use tokio::{net::TcpListener, sync::broadcast, sync::oneshot};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer, ExposeHeaders},
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::validation::validate_config;
use crate::config::{ConfigError, CorsConfig, GatewayConfig, ServerConfig};
use crate::http::request::{request_id, UuidRequestId};
use crate::lifecycle::StartupError;
use crate::observability::metrics;
use crate::proxy::upstream_client;
use crate::service::{register, Pipeline, Service};

/// HTTP server for the gateway.
pub struct GatewayServer {
    router: Router,
    limited: Vec<Arc<Pipeline>>,
    config: ServerConfig,
}

impl GatewayServer {
    /// Build every service, running provider discovery where auth is enabled.
    pub async fn from_config(config: &GatewayConfig) -> Result<Self, StartupError> {
        validate_config(config).map_err(ConfigError::Validation)?;

        let provider = config.middlewares.auth.as_ref();
        let mut services = Vec::with_capacity(config.services.len());
        for service in &config.services {
            services.push(Service::new(service, provider).await?);
            tracing::info!(
                service = %service.name,
                prefix = %service.path_prefix,
                upstream = %service.base_url,
                endpoints = service.endpoints.len(),
                "Service ready"
            );
        }
        Self::from_services(&services, &config.server)
    }

    pub fn from_services(services: &[Service], config: &ServerConfig) -> Result<Self, StartupError> {
        let client = upstream_client();
        let mut router = Router::new();
        let mut limited = Vec::new();

        for service in services {
            for pipeline in service.build_pipelines(&client)? {
                let pipeline = Arc::new(pipeline);
                if pipeline.rate_limiter().is_some() {
                    limited.push(pipeline.clone());
                }
                router = register(router, pipeline)?;
            }
        }

        let router = Self::apply_layers(router, config)?;
        Ok(Self {
            router,
            limited,
            config: config.clone(),
        })
    }

    /// Wrap the routes in the middleware stack, innermost first.
    #[allow(deprecated)]
    fn apply_layers(mut router: Router, config: &ServerConfig) -> Result<Router, StartupError> {
        if let Some(secs) = config.request_timeout_secs {
            router = router.layer(TimeoutLayer::new(Duration::from_secs(secs)));
        }

        router = router
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id(request),
                    )
                }),
            )
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId));

        if let Some(cors) = &config.cors {
            router = router.layer(cors_layer(cors)?);
        }

        Ok(router)
    }

    /// The fully layered router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` fires, then give in-flight requests
    /// `shutdown_grace_secs` before aborting them.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), StartupError> {
        let GatewayServer {
            router,
            limited,
            config,
        } = self;

        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Gateway listening");

        if let Some(secs) = config.limiter_sweep_secs.filter(|s| *s > 0) {
            if !limited.is_empty() {
                tokio::spawn(sweep_limiters(
                    limited,
                    Duration::from_secs(secs),
                    shutdown.resubscribe(),
                ));
            }
        }

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let mut serve = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = stop_rx.await;
                })
                .await
        });

        tokio::select! {
            result = &mut serve => return join_result(result),
            _ = shutdown.recv() => {}
        }

        let grace = Duration::from_secs(config.shutdown_grace_secs);
        tracing::info!(grace_secs = grace.as_secs(), "Draining in-flight requests");
        let _ = stop_tx.send(());

        match tokio::time::timeout(grace, &mut serve).await {
            Ok(result) => join_result(result)?,
            Err(_) => {
                tracing::warn!("Grace period elapsed, aborting remaining requests");
                serve.abort();
            }
        }

        tracing::info!("Gateway stopped");
        Ok(())
    }
}

fn join_result(
    result: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), StartupError> {
    match result {
        Ok(served) => Ok(served?),
        Err(e) => Err(StartupError::Serve(std::io::Error::other(e))),
    }
}

async fn sweep_limiters(
    limited: Vec<Arc<Pipeline>>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.recv() => return,
        }

        let (purged, tracked) = sweep_once(&limited);
        tracing::debug!(purged, tracked, "Rate-limit counters swept");
    }
}

/// Drop elapsed windows and report the keys left per endpoint.
/// Returns the purged and remaining key counts.
fn sweep_once(limited: &[Arc<Pipeline>]) -> (usize, usize) {
    let mut purged = 0;
    let mut tracked = 0;
    for pipeline in limited {
        let Some(limiter) = pipeline.rate_limiter() else {
            continue;
        };
        let counter = limiter.counter();
        if !counter.is_empty() {
            purged += counter.purge_expired();
        }
        let remaining = counter.len();
        tracked += remaining;
        metrics::record_rate_limit_keys(pipeline.service(), pipeline.route(), remaining);
    }
    (purged, tracked)
}

fn cors_layer(config: &CorsConfig) -> Result<CorsLayer, StartupError> {
    let wildcard = |values: &[String]| values.iter().any(|v| v == "*");

    let origins = if wildcard(&config.allow_origins) {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(parse_all::<HeaderValue>(&config.allow_origins, "origin")?)
    };
    let methods = if wildcard(&config.allow_methods) {
        AllowMethods::from(Any)
    } else {
        AllowMethods::list(parse_all::<Method>(&config.allow_methods, "method")?)
    };
    let headers = if wildcard(&config.allow_headers) {
        AllowHeaders::from(Any)
    } else {
        AllowHeaders::list(parse_all::<HeaderName>(&config.allow_headers, "header")?)
    };
    let exposed = if wildcard(&config.expose_headers) {
        ExposeHeaders::from(Any)
    } else {
        ExposeHeaders::list(parse_all::<HeaderName>(&config.expose_headers, "header")?)
    };

    let mut layer = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
        .expose_headers(exposed)
        .allow_credentials(config.allow_credentials);
    if let Some(max_age) = config.max_age {
        layer = layer.max_age(max_age);
    }
    Ok(layer)
}

fn parse_all<T>(values: &[String], what: &str) -> Result<Vec<T>, StartupError>
where
    T: std::str::FromStr,
{
    values
        .iter()
        .map(|v| {
            v.parse()
                .map_err(|_| StartupError::Cors(format!("invalid {what} {v:?}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EndpointConfig, EndpointRateLimitConfig, ServiceConfig};
    use crate::security::LimitBy;
    use axum::http::{HeaderMap, StatusCode};
    use ::metrics::{
        Counter, Gauge, GaugeFn, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
    };
    use std::sync::Mutex;
    use tower::ServiceExt;

    type Readings = Arc<Mutex<Vec<(String, Vec<(String, String)>, f64)>>>;

    /// Keeps every gauge value set while it is the local recorder.
    #[derive(Default)]
    struct GaugeRecorder {
        readings: Readings,
    }

    struct RecordedGauge {
        key: Key,
        readings: Readings,
    }

    impl GaugeFn for RecordedGauge {
        fn increment(&self, _value: f64) {}

        fn decrement(&self, _value: f64) {}

        fn set(&self, value: f64) {
            let labels = self
                .key
                .labels()
                .map(|label| (label.key().to_string(), label.value().to_string()))
                .collect();
            self.readings
                .lock()
                .unwrap()
                .push((self.key.name().to_string(), labels, value));
        }
    }

    impl Recorder for GaugeRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, _: &Key, _: &Metadata<'_>) -> Counter {
            Counter::noop()
        }

        fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::from_arc(Arc::new(RecordedGauge {
                key: key.clone(),
                readings: self.readings.clone(),
            }))
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    fn service(base_url: &str) -> Service {
        let config = ServiceConfig {
            name: "users".into(),
            path_prefix: "/users".into(),
            base_url: base_url.into(),
            middlewares: Default::default(),
            endpoints: vec![EndpointConfig {
                method: "GET".into(),
                path: "/:id".into(),
                ..Default::default()
            }],
        };
        Service::with_guard(&config, None, None)
    }

    #[tokio::test]
    async fn test_request_id_is_generated_and_kept() {
        let server =
            GatewayServer::from_services(&[service("http://127.0.0.1:9")], &ServerConfig::default())
                .unwrap();

        let response = server
            .router()
            .oneshot(Request::get("/nothing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let generated = response.headers()["x-request-id"].to_str().unwrap();
        assert!(uuid::Uuid::parse_str(generated).is_ok());

        let response = server
            .router()
            .oneshot(
                Request::get("/nothing")
                    .header("x-request-id", "caller-id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()["x-request-id"], "caller-id");
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let config = ServerConfig {
            cors: Some(CorsConfig {
                allow_origins: vec!["http://app.local".into()],
                allow_methods: vec!["GET".into()],
                ..Default::default()
            }),
            ..Default::default()
        };
        let server = GatewayServer::from_services(&[service("http://127.0.0.1:9")], &config).unwrap();

        let response = server
            .router()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/users/1")
                    .header("origin", "http://app.local")
                    .header("access-control-request-method", "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "http://app.local"
        );
    }

    #[test]
    fn test_invalid_cors_method() {
        let config = CorsConfig {
            allow_methods: vec!["NOT A METHOD".into()],
            ..Default::default()
        };
        assert!(matches!(cors_layer(&config), Err(StartupError::Cors(_))));
    }

    #[tokio::test]
    async fn test_conflicting_parameter_names_fail_startup() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [[services]]
            name = "users"
            path_prefix = "/users"
            base_url = "http://127.0.0.1:9"
            [[services.endpoints]]
            method = "GET"
            path = "/:id"
            [[services.endpoints]]
            method = "DELETE"
            path = "/:user_id"
        "#,
        )
        .unwrap();

        match GatewayServer::from_config(&config).await {
            Err(StartupError::Config(ConfigError::Validation(errors))) => {
                assert_eq!(errors[0].field, "services[0].endpoints[1].path");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("startup should fail"),
        }
    }

    #[test]
    fn test_sweep_reports_keys_per_endpoint() {
        let config = ServiceConfig {
            name: "users".into(),
            path_prefix: "/users".into(),
            base_url: "http://127.0.0.1:9".into(),
            middlewares: Default::default(),
            endpoints: vec![
                EndpointConfig {
                    method: "GET".into(),
                    path: "/:id".into(),
                    rate_limit: Some(EndpointRateLimitConfig {
                        enabled: true,
                        limit_by: Some(LimitBy::Global),
                        window: Some(Duration::from_secs(60)),
                        max_count: Some(5),
                    }),
                    ..Default::default()
                },
                EndpointConfig {
                    method: "POST".into(),
                    path: "/".into(),
                    ..Default::default()
                },
            ],
        };
        let server = GatewayServer::from_services(
            &[Service::with_guard(&config, None, None)],
            &ServerConfig::default(),
        )
        .unwrap();
        assert_eq!(server.limited.len(), 1);

        let limiter = server.limited[0].rate_limiter().unwrap();
        limiter.check(&HeaderMap::new()).unwrap();

        let recorder = GaugeRecorder::default();
        let (purged, tracked) =
            ::metrics::with_local_recorder(&recorder, || sweep_once(&server.limited));
        assert_eq!((purged, tracked), (0, 1));

        let readings = recorder.readings.lock().unwrap();
        assert_eq!(
            *readings,
            vec![(
                "gateway_rate_limit_keys".to_string(),
                vec![
                    ("service".to_string(), "users".to_string()),
                    ("endpoint".to_string(), "/users/{id}".to_string()),
                ],
                1.0,
            )]
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let server =
            GatewayServer::from_services(&[service("http://127.0.0.1:9")], &ServerConfig::default())
                .unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(server.run(listener, rx));
        tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}

//! Per-endpoint check chains.
//!
//! ```text
//! auth → body size → header size → rate limit → forward
//! ```
//!
//! Stages whose policy is absent or disabled are left out. Identity is always
//! established before any rate-limit budget is spent.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    http::{Method, Request},
    response::{IntoResponse, Response},
    routing::{on, MethodFilter},
    Router,
};

use super::endpoint::EndpointPolicy;
use crate::auth::{AuthGuard, AuthRequirement};
use crate::error::GatewayError;
use crate::lifecycle::startup::StartupError;
use crate::observability::metrics;
use crate::proxy::Forwarder;
use crate::security::limits::{check_header_size, limit_body};
use crate::security::RateLimiter;

/// One check run before forwarding.
pub enum Stage {
    Auth {
        guard: Arc<AuthGuard>,
        requirement: AuthRequirement,
    },
    BodySize(u64),
    HeaderSize(usize),
    RateLimit(Arc<RateLimiter>),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Auth { .. } => "auth",
            Stage::BodySize(_) => "body_size",
            Stage::HeaderSize(_) => "header_size",
            Stage::RateLimit(_) => "rate_limit",
        }
    }

    /// Parameters of the check, for startup logs.
    pub fn describe(&self) -> String {
        match self {
            Stage::Auth { requirement, .. } => format!(
                "roles {:?}, permissions {:?}",
                requirement.roles, requirement.permissions
            ),
            Stage::BodySize(limit) => format!("{limit} bytes"),
            Stage::HeaderSize(limit) => format!("{limit} bytes"),
            Stage::RateLimit(limiter) => format!(
                "{} requests every {} by {}",
                limiter.counter().max_count(),
                humantime::format_duration(limiter.counter().window()),
                String::from(limiter.limit_by())
            ),
        }
    }

    /// Run the check, handing the request on when it passes.
    pub async fn apply(&self, request: Request<Body>) -> Result<Request<Body>, GatewayError> {
        match self {
            Stage::Auth { guard, requirement } => {
                guard.admit(request.headers(), requirement).await?;
                Ok(request)
            }
            Stage::BodySize(limit) => limit_body(request, *limit),
            Stage::HeaderSize(limit) => {
                check_header_size(request.headers(), *limit)?;
                Ok(request)
            }
            Stage::RateLimit(limiter) => {
                limiter.check(request.headers())?;
                Ok(request)
            }
        }
    }
}

/// Ordered stages plus the forwarder of one route.
pub struct Pipeline {
    service: String,
    method: Method,
    route: String,
    stages: Vec<Stage>,
    forwarder: Forwarder,
}

impl Pipeline {
    pub async fn handle(&self, mut request: Request<Body>) -> Response {
        for stage in &self.stages {
            request = match stage.apply(request).await {
                Ok(request) => request,
                Err(e) => {
                    tracing::info!(
                        service = %self.service,
                        route = %self.route,
                        stage = stage.name(),
                        error = %e,
                        "Request rejected"
                    );
                    metrics::record_rejection(stage.name(), e.kind());
                    metrics::record_request(&self.service, e.status().as_u16());
                    return e.into_response();
                }
            };
        }

        let started = Instant::now();
        match self.forwarder.forward(request).await {
            Ok(response) => {
                metrics::record_upstream_duration(&self.service, started);
                metrics::record_request(&self.service, response.status().as_u16());
                response
            }
            Err(e) => {
                tracing::error!(
                    service = %self.service,
                    route = %self.route,
                    error = %e,
                    "Forwarding failed"
                );
                metrics::record_rejection("forward", e.kind());
                metrics::record_request(&self.service, e.status().as_u16());
                e.into_response()
            }
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Full router path, prefix included.
    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.stages.iter().find_map(|stage| match stage {
            Stage::RateLimit(limiter) => Some(limiter),
            _ => None,
        })
    }
}

/// Builds the pipelines of one service.
pub struct PipelineBuilder {
    service: String,
    path_prefix: String,
    guard: Option<Arc<AuthGuard>>,
    forwarder: Forwarder,
}

impl PipelineBuilder {
    pub fn new(
        service: impl Into<String>,
        path_prefix: impl Into<String>,
        guard: Option<Arc<AuthGuard>>,
        forwarder: Forwarder,
    ) -> Self {
        Self {
            service: service.into(),
            path_prefix: path_prefix.into(),
            guard,
            forwarder,
        }
    }

    pub fn build(&self, policy: &EndpointPolicy) -> Result<Pipeline, StartupError> {
        let method = Method::from_bytes(policy.method.as_bytes()).map_err(|_| {
            StartupError::Route(format!("invalid method {:?}", policy.method))
        })?;
        let route = route_path(&self.path_prefix, &policy.path);
        let mut stages = Vec::new();

        match (&policy.auth, &self.guard) {
            (Some(auth), Some(guard)) if auth.enabled => stages.push(Stage::Auth {
                guard: guard.clone(),
                requirement: AuthRequirement {
                    roles: auth.authorized_roles.clone(),
                    permissions: auth.required_permissions.clone(),
                },
            }),
            (Some(auth), None) if auth.enabled => tracing::warn!(
                service = %self.service,
                %method,
                %route,
                "Endpoint enables auth but its service does not, auth skipped"
            ),
            _ => tracing::warn!(
                service = %self.service,
                %method,
                %route,
                "Endpoint is not protected"
            ),
        }

        if let Some(limit) = policy.max_body_size {
            stages.push(Stage::BodySize(limit));
        }
        if let Some(limit) = policy.max_header_size {
            stages.push(Stage::HeaderSize(limit));
        }
        if let Some(rate_limit) = policy.rate_limit.as_ref().filter(|r| r.enabled) {
            stages.push(Stage::RateLimit(Arc::new(RateLimiter::new(
                rate_limit.limit_by,
                rate_limit.window,
                rate_limit.max_count,
            ))));
        }

        let pipeline = Pipeline {
            service: self.service.clone(),
            method,
            route,
            stages,
            forwarder: self.forwarder.clone(),
        };

        for stage in &pipeline.stages {
            tracing::info!(
                service = %pipeline.service,
                method = %pipeline.method,
                route = %pipeline.route,
                stage = stage.name(),
                "{}",
                stage.describe()
            );
        }
        tracing::info!(
            service = %pipeline.service,
            method = %pipeline.method,
            route = %pipeline.route,
            stages = ?pipeline.stage_names(),
            "Endpoint registered"
        );

        Ok(pipeline)
    }
}

/// Router path for an endpoint. `:name` and `*name` segments become
/// `{name}` and `{*name}`.
pub fn route_path(prefix: &str, path: &str) -> String {
    let translated: Vec<String> = path
        .split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{name}}}")
            } else if let Some(name) = segment.strip_prefix('*') {
                format!("{{*{name}}}")
            } else {
                segment.to_string()
            }
        })
        .collect();
    format!("{prefix}{}", translated.join("/"))
}

/// Mount `pipeline` on its method and route.
pub fn register(router: Router, pipeline: Arc<Pipeline>) -> Result<Router, StartupError> {
    let filter = MethodFilter::try_from(pipeline.method().clone())
        .map_err(|e| StartupError::Route(format!("{}: {e}", pipeline.route())))?;
    let route = pipeline.route().to_string();

    Ok(router.route(
        &route,
        on(filter, move |request: Request<Body>| {
            let pipeline = pipeline.clone();
            async move { pipeline.handle(request).await }
        }),
    ))
}

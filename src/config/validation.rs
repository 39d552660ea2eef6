//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that services can be routed and reached
//! - Validate value ranges of every resolved rate limit
//! - Detect conflicting routes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::{HashMap, HashSet};
use std::fmt;

use axum::http::Method;
use axum::routing::MethodFilter;
use url::Url;

use crate::config::schema::GatewayConfig;
use crate::service::endpoint::{resolve, ServiceDefaults};
use crate::service::pipeline::route_path;

/// One semantic problem, located by its dotted path in the config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut names = HashSet::new();
    let mut routes = HashSet::new();
    let mut params = HashMap::new();

    let provider = config.middlewares.auth.as_ref();

    for (i, service) in config.services.iter().enumerate() {
        let at = format!("services[{i}]");

        if service.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("{at}.name"), "must not be empty"));
        } else if !names.insert(service.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{at}.name"),
                format!("duplicate service name {:?}", service.name),
            ));
        }

        match Url::parse(&service.base_url) {
            Ok(url) if url.scheme() == "http" && url.has_host() => {}
            Ok(url) => errors.push(ValidationError::new(
                format!("{at}.base_url"),
                format!("unsupported scheme {:?}, only http upstreams are supported", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new(
                format!("{at}.base_url"),
                format!("not an absolute URL: {e}"),
            )),
        }

        if !service.path_prefix.is_empty() && !service.path_prefix.starts_with('/') {
            errors.push(ValidationError::new(
                format!("{at}.path_prefix"),
                "must be empty or start with '/'",
            ));
        }

        if service.middlewares.auth.enabled {
            match provider {
                Some(p) if !p.provider_url.is_empty() && !p.client_id.is_empty() => {}
                _ => errors.push(ValidationError::new(
                    format!("{at}.middlewares.auth"),
                    "auth is enabled but middlewares.auth.provider_url or client_id is not set",
                )),
            }
        }

        let defaults = ServiceDefaults::from_config(service, provider);

        for (j, endpoint) in service.endpoints.iter().enumerate() {
            let at = format!("{at}.endpoints[{j}]");

            if !endpoint.path.starts_with('/') {
                errors.push(ValidationError::new(format!("{at}.path"), "must start with '/'"));
            }

            match Method::from_bytes(endpoint.method.to_uppercase().as_bytes()) {
                Ok(method) => {
                    if MethodFilter::try_from(method.clone()).is_err() {
                        errors.push(ValidationError::new(
                            format!("{at}.method"),
                            format!("method {method} cannot be routed"),
                        ));
                    }
                    let route = route_path(&service.path_prefix, &endpoint.path);
                    if !routes.insert((method.clone(), route.clone())) {
                        errors.push(ValidationError::new(
                            format!("{at}"),
                            format!("duplicate route {method} {route}"),
                        ));
                    } else if let Some((existing, name)) = conflicting_param(&mut params, &route) {
                        errors.push(ValidationError::new(
                            format!("{at}.path"),
                            format!("parameter {name:?} in {route} was named {existing:?} elsewhere"),
                        ));
                    }
                }
                Err(_) => errors.push(ValidationError::new(
                    format!("{at}.method"),
                    format!("invalid HTTP method {:?}", endpoint.method),
                )),
            }

            let policy = resolve(endpoint, &defaults);
            if let Some(rate_limit) = policy.rate_limit.filter(|r| r.enabled) {
                if rate_limit.window.is_zero() {
                    errors.push(ValidationError::new(
                        format!("{at}.rate_limit.window"),
                        "resolved window must be greater than zero",
                    ));
                }
                if rate_limit.max_count == 0 {
                    errors.push(ValidationError::new(
                        format!("{at}.rate_limit.max_count"),
                        "resolved max_count must be greater than zero",
                    ));
                }
            }
        }
    }

    if let Some(cors) = &config.server.cors {
        let wildcard = |values: &[String]| values.iter().any(|v| v == "*");
        if cors.allow_credentials
            && (wildcard(&cors.allow_origins)
                || wildcard(&cors.allow_methods)
                || wildcard(&cors.allow_headers))
        {
            errors.push(ValidationError::new(
                "server.cors.allow_credentials",
                "credentials cannot be combined with wildcard origins, methods or headers",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Routes sharing a prefix must agree on the name of each parameter in it,
/// whatever their methods. Returns the earlier name and the clashing one.
fn conflicting_param(
    seen: &mut HashMap<String, String>,
    route: &str,
) -> Option<(String, String)> {
    let mut shape = String::new();
    for segment in route.split('/').skip(1) {
        shape.push('/');
        let Some(inner) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) else {
            shape.push_str(segment);
            continue;
        };
        let (placeholder, name) = match inner.strip_prefix('*') {
            Some(name) => ("{*}", name),
            None => ("{}", inner),
        };
        shape.push_str(placeholder);

        match seen.get(&shape) {
            Some(existing) if existing != name => {
                return Some((existing.clone(), name.to_string()));
            }
            Some(_) => {}
            None => {
                seen.insert(shape.clone(), name.to_string());
            }
        }
    }
    None
}

//! Service-to-endpoint policy cascade.
//!
//! Each endpoint declares a partial policy; [`resolve`] fills the gaps from
//! the service defaults once at startup. Presence matters throughout: an
//! absent block inherits, a present one overrides, even when disabled.

use std::time::Duration;

use crate::config::{AuthProviderConfig, EndpointConfig, ServiceConfig};
use crate::security::LimitBy;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthPolicy {
    pub enabled: bool,
    pub authorized_roles: Vec<String>,
    pub required_permissions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub enabled: bool,
    pub limit_by: LimitBy,
    pub window: Duration,
    pub max_count: u32,
}

/// Fully resolved policy of one route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPolicy {
    pub method: String,
    pub path: String,
    pub auth: Option<AuthPolicy>,
    pub rate_limit: Option<RateLimitPolicy>,
    pub max_body_size: Option<u64>,
    pub max_header_size: Option<usize>,
}

/// Service-level values endpoints inherit from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceDefaults {
    pub auth_enabled: bool,
    pub authorized_roles: Vec<String>,
    pub required_permissions: Vec<String>,
    pub max_body_size: u64,
    pub max_header_size: usize,
    pub rate_limit_enabled: bool,
    pub limit_by: LimitBy,
    pub window: Duration,
    pub max_count: u32,
}

impl ServiceDefaults {
    /// Accepted role and permission values come from the shared provider
    /// block; everything else from the service's own middlewares.
    pub fn from_config(service: &ServiceConfig, provider: Option<&AuthProviderConfig>) -> Self {
        let middlewares = &service.middlewares;
        let (authorized_roles, required_permissions) = provider
            .map(|p| {
                (
                    p.authorized_roles.values.clone(),
                    p.required_permissions.values.clone(),
                )
            })
            .unwrap_or_default();

        Self {
            auth_enabled: middlewares.auth.enabled,
            authorized_roles,
            required_permissions,
            max_body_size: middlewares.max_body_size,
            max_header_size: middlewares.max_header_size,
            rate_limit_enabled: middlewares.rate_limit.enabled,
            limit_by: middlewares.rate_limit.limit_by,
            window: middlewares.rate_limit.window,
            max_count: middlewares.rate_limit.max_count,
        }
    }
}

/// Merge service defaults into one endpoint's declared policy.
pub fn resolve(endpoint: &EndpointConfig, service: &ServiceDefaults) -> EndpointPolicy {
    let max_body_size = endpoint
        .max_body_size
        .or((service.max_body_size > 0).then_some(service.max_body_size));

    let max_header_size = endpoint
        .max_header_size
        .or((service.max_header_size > 0).then_some(service.max_header_size));

    let rate_limit = match &endpoint.rate_limit {
        None if service.rate_limit_enabled => Some(RateLimitPolicy {
            enabled: true,
            limit_by: service.limit_by,
            window: service.window,
            max_count: service.max_count,
        }),
        None => None,
        Some(declared) => Some(RateLimitPolicy {
            enabled: declared.enabled,
            limit_by: declared.limit_by.unwrap_or(service.limit_by),
            window: declared.window.unwrap_or(service.window),
            max_count: declared.max_count.unwrap_or(service.max_count),
        }),
    };

    let auth = match &endpoint.auth {
        None if service.auth_enabled => Some(AuthPolicy {
            enabled: true,
            authorized_roles: service.authorized_roles.clone(),
            required_permissions: service.required_permissions.clone(),
        }),
        None => None,
        Some(declared) => Some(AuthPolicy {
            enabled: declared.enabled,
            authorized_roles: declared.authorized_roles.clone(),
            required_permissions: declared.required_permissions.clone(),
        }),
    };

    EndpointPolicy {
        method: endpoint.method.to_uppercase(),
        path: endpoint.path.clone(),
        auth,
        rate_limit,
        max_body_size,
        max_header_size,
    }
}

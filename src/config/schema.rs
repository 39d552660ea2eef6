//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from the TOML config
//! file. Endpoint fields that take part in the service cascade are `Option`s:
//! an absent block inherits, a present one overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::ClaimCheckerConfig;
use crate::security::LimitBy;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener, timeouts and shutdown.
    pub server: ServerConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Middleware settings shared by every service.
    pub middlewares: GlobalMiddlewares,

    /// Upstream services and their endpoints.
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port bound on all interfaces.
    pub port: u16,

    /// Total time allowed per request. No timeout when absent.
    pub request_timeout_secs: Option<u64>,

    /// Time given to in-flight requests after a shutdown signal.
    pub shutdown_grace_secs: u64,

    /// Interval of the background sweep that drops expired rate-limit
    /// counters. Disabled when absent.
    pub limiter_sweep_secs: Option<u64>,

    pub cors: Option<CorsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            request_timeout_secs: None,
            shutdown_grace_secs: 5,
            limiter_sweep_secs: None,
            cors: None,
        }
    }
}

/// Cross-origin settings applied to every route.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CorsConfig {
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub allow_credentials: bool,
    #[serde(with = "humantime_serde_opt")]
    pub max_age: Option<Duration>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GlobalMiddlewares {
    /// Identity provider shared by every service that enables auth.
    pub auth: Option<AuthProviderConfig>,
}

/// Identity provider and the claims carrying roles and permissions.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AuthProviderConfig {
    pub provider_url: String,
    /// Expected `aud` of every token.
    pub client_id: String,
    pub authorized_roles: ClaimCheckerConfig,
    pub required_permissions: ClaimCheckerConfig,
}

/// One upstream service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    pub name: String,

    /// Gateway path prefix stripped before forwarding. May be empty.
    #[serde(default)]
    pub path_prefix: String,

    /// Upstream base URL, e.g. `http://users:8080`.
    pub base_url: String,

    #[serde(default)]
    pub middlewares: ServiceMiddlewares,

    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

/// Defaults applied to every endpoint of a service. Zero sizes mean no limit.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceMiddlewares {
    pub auth: ServiceAuthConfig,
    pub max_body_size: u64,
    pub max_header_size: usize,
    pub rate_limit: ServiceRateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceAuthConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceRateLimitConfig {
    pub enabled: bool,
    pub limit_by: LimitBy,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub max_count: u32,
}

/// One route of a service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EndpointConfig {
    pub method: String,

    /// Path under the service prefix, e.g. `/{id}`.
    pub path: String,

    #[serde(default)]
    pub auth: Option<EndpointAuthConfig>,

    #[serde(default)]
    pub rate_limit: Option<EndpointRateLimitConfig>,

    #[serde(default)]
    pub max_body_size: Option<u64>,

    #[serde(default)]
    pub max_header_size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct EndpointAuthConfig {
    /// Set to false to opt out of a service-wide auth requirement.
    pub enabled: bool,
    pub authorized_roles: Vec<String>,
    pub required_permissions: Vec<String>,
}

/// Endpoint rate limit. Unset fields are backfilled from the service.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct EndpointRateLimitConfig {
    pub enabled: bool,
    pub limit_by: Option<LimitBy>,
    #[serde(with = "humantime_serde_opt")]
    pub window: Option<Duration>,
    pub max_count: Option<u32>,
}

/// Durations written as humantime strings (`"2s"`, `"1h 30m"`).
mod humantime_serde {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(D::Error::custom)
    }
}

mod humantime_serde_opt {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => super::humantime_serde::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => humantime::parse_duration(&raw).map(Some).map_err(D::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ClaimType;

    const SAMPLE: &str = r#"
        [server]
        port = 9000

        [middlewares.auth]
        provider_url = "http://idp.local/realms/main"
        client_id = "gateway"
        authorized_roles = { token_key = "realm_access.roles", claim_type = "[]string", values = ["user"] }
        required_permissions = { token_key = "scope", claim_type = "string" }

        [[services]]
        name = "users"
        path_prefix = "/users"
        base_url = "http://users:8080"

        [services.middlewares]
        auth = { enabled = true }
        max_body_size = 1024
        rate_limit = { enabled = true, limit_by = "sub_claim", window = "1h", max_count = 10 }

        [[services.endpoints]]
        method = "GET"
        path = "/{id}"
        rate_limit = { enabled = true, max_count = 14 }

        [[services.endpoints]]
        method = "POST"
        path = "/"
        auth = { enabled = false }
    "#;

    #[test]
    fn test_parse_sample() {
        let config: GatewayConfig = toml::from_str(SAMPLE).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.shutdown_grace_secs, 5);

        let auth = config.middlewares.auth.unwrap();
        assert_eq!(auth.authorized_roles.claim_type, ClaimType::StringList);
        assert_eq!(auth.authorized_roles.values, vec!["user".to_string()]);
        assert!(auth.required_permissions.values.is_empty());

        let service = &config.services[0];
        assert!(service.middlewares.auth.enabled);
        assert_eq!(service.middlewares.rate_limit.limit_by, LimitBy::SubClaim);
        assert_eq!(service.middlewares.rate_limit.window, Duration::from_secs(3600));
        assert_eq!(service.middlewares.max_header_size, 0);

        let get = &service.endpoints[0];
        let rate_limit = get.rate_limit.as_ref().unwrap();
        assert_eq!(rate_limit.max_count, Some(14));
        assert_eq!(rate_limit.window, None);
        assert_eq!(get.auth, None);

        let post = &service.endpoints[1];
        assert_eq!(post.auth.as_ref().map(|a| a.enabled), Some(false));
    }

    #[test]
    fn test_bad_duration_is_rejected() {
        let raw = r#"
            [[services]]
            name = "a"
            base_url = "http://a"
            [services.middlewares]
            rate_limit = { enabled = true, window = "soon", max_count = 1 }
        "#;
        assert!(toml::from_str::<GatewayConfig>(raw).is_err());
    }
}

//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, GATEWAY_* environment overrides, deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → services and server built from it once at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_config_from_str, ConfigError};
pub use schema::{
    AuthProviderConfig, CorsConfig, EndpointAuthConfig, EndpointConfig, EndpointRateLimitConfig,
    GatewayConfig, LogFormat, ObservabilityConfig, ServerConfig, ServiceConfig,
    ServiceMiddlewares, ServiceRateLimitConfig,
};
pub use validation::ValidationError;

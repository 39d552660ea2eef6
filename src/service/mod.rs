//! Upstream services and their endpoint pipelines.
//!
//! # Data Flow
//! ```text
//! ServiceConfig + global auth provider
//!     → endpoint.rs (cascade service defaults into each endpoint)
//!     → pipeline.rs (ordered checks + forwarder per endpoint)
//!     → registered on the server router
//! ```

pub mod endpoint;
pub mod pipeline;

use std::sync::Arc;

use crate::auth::AuthGuard;
use crate::config::{AuthProviderConfig, ServiceConfig};
use crate::lifecycle::startup::StartupError;
use crate::proxy::{Forwarder, UpstreamClient};

pub use endpoint::{resolve, AuthPolicy, EndpointPolicy, RateLimitPolicy, ServiceDefaults};
pub use pipeline::{register, route_path, Pipeline, PipelineBuilder, Stage};

/// One upstream service with its resolved endpoints.
pub struct Service {
    name: String,
    base_url: String,
    path_prefix: String,
    guard: Option<Arc<AuthGuard>>,
    endpoints: Vec<EndpointPolicy>,
}

impl Service {
    /// Resolve the endpoints and, when the service enables auth, discover the
    /// identity provider. Discovery failure is fatal for the service.
    pub async fn new(
        config: &ServiceConfig,
        provider: Option<&AuthProviderConfig>,
    ) -> Result<Self, StartupError> {
        let guard = match provider {
            Some(provider) if config.middlewares.auth.enabled => {
                let guard = AuthGuard::new(provider).await.map_err(|source| {
                    StartupError::Discovery {
                        service: config.name.clone(),
                        source,
                    }
                })?;
                Some(Arc::new(guard))
            }
            _ => None,
        };
        Ok(Self::with_guard(config, provider, guard))
    }

    /// Build without discovery, using `guard` as is.
    pub fn with_guard(
        config: &ServiceConfig,
        provider: Option<&AuthProviderConfig>,
        guard: Option<Arc<AuthGuard>>,
    ) -> Self {
        let defaults = ServiceDefaults::from_config(config, provider);
        let endpoints = config
            .endpoints
            .iter()
            .map(|endpoint| resolve(endpoint, &defaults))
            .collect();

        Self {
            name: config.name.clone(),
            base_url: config.base_url.clone(),
            path_prefix: config.path_prefix.clone(),
            guard,
            endpoints,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    pub fn endpoints(&self) -> &[EndpointPolicy] {
        &self.endpoints
    }

    pub fn build_pipelines(&self, client: &UpstreamClient) -> Result<Vec<Pipeline>, StartupError> {
        let builder = PipelineBuilder::new(
            self.name.clone(),
            self.path_prefix.clone(),
            self.guard.clone(),
            Forwarder::new(client.clone(), self.path_prefix.clone(), self.base_url.clone()),
        );
        self.endpoints
            .iter()
            .map(|endpoint| builder.build(endpoint))
            .collect()
    }
}

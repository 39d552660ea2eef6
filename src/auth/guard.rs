//! Per-request authorization.
//!
//! ```text
//! extract token → verify (provider) → parse claims → roles? → permissions? → admit
//! ```
//!
//! Any failing step aborts the request with 401. Claims are parsed a second
//! time after verification because the verifier only answers yes or no.

use std::sync::Arc;

use axum::http::HeaderMap;

use super::claims::{ClaimChecker, ClaimCheckerConfig};
use super::token::{extract_bearer, parse_unverified};
use super::verifier::{DiscoveryError, OidcVerifier, TokenVerifier};
use crate::config::AuthProviderConfig;
use crate::error::GatewayError;

/// Values an endpoint accepts for the role and permission claims.
///
/// An empty list skips that check entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthRequirement {
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

/// Shared by every endpoint of a service.
pub struct AuthGuard {
    verifier: Arc<dyn TokenVerifier>,
    role_checker: ClaimChecker,
    permission_checker: ClaimChecker,
}

impl AuthGuard {
    /// Discover the provider and build a guard around it.
    pub async fn new(config: &AuthProviderConfig) -> Result<Self, DiscoveryError> {
        let verifier = OidcVerifier::discover(&config.provider_url, &config.client_id).await?;
        Ok(Self::with_verifier(
            Arc::new(verifier),
            &config.authorized_roles,
            &config.required_permissions,
        ))
    }

    pub fn with_verifier(
        verifier: Arc<dyn TokenVerifier>,
        roles: &ClaimCheckerConfig,
        permissions: &ClaimCheckerConfig,
    ) -> Self {
        Self {
            verifier,
            role_checker: ClaimChecker::from_config(roles),
            permission_checker: ClaimChecker::from_config(permissions),
        }
    }

    pub async fn admit(
        &self,
        headers: &HeaderMap,
        requirement: &AuthRequirement,
    ) -> Result<(), GatewayError> {
        let raw_token = extract_bearer(headers)?;

        self.verifier.verify(raw_token).await?;

        let claims = parse_unverified(raw_token)?;

        if !requirement.roles.is_empty() {
            match self.role_checker.check(&claims, &requirement.roles) {
                Ok(true) => {}
                Ok(false) => return Err(GatewayError::RoleRejected),
                Err(e) => {
                    tracing::warn!(error = %e, "Role claim check failed");
                    return Err(GatewayError::RoleRejected);
                }
            }
        }

        if !requirement.permissions.is_empty() {
            match self.permission_checker.check(&claims, &requirement.permissions) {
                Ok(true) => {}
                Ok(false) => return Err(GatewayError::PermissionRejected),
                Err(e) => {
                    tracing::warn!(error = %e, "Permission claim check failed");
                    return Err(GatewayError::PermissionRejected);
                }
            }
        }

        Ok(())
    }
}

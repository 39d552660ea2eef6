//! Authentication and authorization subsystem.
//!
//! # Data Flow
//! ```text
//! Authorization header
//!     → token.rs (extract bearer, parse claims unverified)
//!     → verifier.rs (signature/issuer/audience/expiry via OIDC provider)
//!     → claims.rs (role and permission claim checks)
//!     → guard.rs (admit or 401)
//! ```

pub mod claims;
pub mod guard;
pub mod token;
pub mod verifier;

pub use claims::{ClaimChecker, ClaimCheckerConfig, ClaimType};
pub use guard::{AuthGuard, AuthRequirement};
pub use token::Claims;
pub use verifier::{DiscoveryError, OidcVerifier, TokenVerifier};

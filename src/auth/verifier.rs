//! Token verification against an OpenID Connect provider.
//!
//! Discovery runs once when the verifier is built. The key set is fetched
//! eagerly and refreshed only when a token names a key id that is not known,
//! at most once per [`JWKS_REFRESH_INTERVAL`].

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

use crate::error::GatewayError;

/// Minimum delay between two key set downloads.
pub const JWKS_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// Yes/no verification of a raw token.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, raw_token: &str) -> Result<(), GatewayError>;
}

/// Failure while talking to the identity provider at startup.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid provider url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("request to {url} failed: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("issuer did not match the issuer returned by provider, expected {expected:?} got {actual:?}")]
    IssuerMismatch { expected: String, actual: String },

    #[error("key set at {url} contains no usable signing key")]
    NoSigningKeys { url: String },
}

#[derive(Debug, Deserialize)]
struct ProviderMetadata {
    issuer: String,
    jwks_uri: String,
    #[serde(default)]
    id_token_signing_alg_values_supported: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: Option<String>,
    kty: String,
    #[serde(rename = "use")]
    usage: Option<String>,
    n: Option<String>,
    e: Option<String>,
    crv: Option<String>,
    x: Option<String>,
    y: Option<String>,
}

impl Jwk {
    fn decoding_key(&self) -> Option<DecodingKey> {
        if self.usage.as_deref().is_some_and(|u| u != "sig") {
            return None;
        }
        match (self.kty.as_str(), self) {
            ("RSA", Jwk { n: Some(n), e: Some(e), .. }) => DecodingKey::from_rsa_components(n, e).ok(),
            ("EC", Jwk { crv: Some(crv), x: Some(x), y: Some(y), .. }) if crv == "P-256" => {
                DecodingKey::from_ec_components(x, y).ok()
            }
            _ => None,
        }
    }
}

/// Verifies signature, issuer, audience and expiry of provider-issued tokens.
pub struct OidcVerifier {
    issuer: String,
    client_id: String,
    jwks_uri: Url,
    algorithms: Vec<Algorithm>,
    client: reqwest::Client,
    keys: RwLock<HashMap<String, Arc<DecodingKey>>>,
    last_refresh: Mutex<Option<Instant>>,
}

impl OidcVerifier {
    /// Run provider discovery and download the initial key set.
    pub async fn discover(provider_url: &str, client_id: &str) -> Result<Self, DiscoveryError> {
        let base = provider_url.trim_end_matches('/');
        let discovery_url = format!("{base}{DISCOVERY_PATH}");
        Url::parse(&discovery_url).map_err(|source| DiscoveryError::InvalidUrl {
            url: provider_url.to_string(),
            source,
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|source| DiscoveryError::Http {
                url: discovery_url.clone(),
                source,
            })?;

        let metadata: ProviderMetadata = fetch_json(&client, &discovery_url).await?;

        if metadata.issuer.trim_end_matches('/') != base {
            return Err(DiscoveryError::IssuerMismatch {
                expected: provider_url.to_string(),
                actual: metadata.issuer,
            });
        }

        let jwks_uri = Url::parse(&metadata.jwks_uri).map_err(|source| DiscoveryError::InvalidUrl {
            url: metadata.jwks_uri.clone(),
            source,
        })?;

        let mut algorithms: Vec<Algorithm> = metadata
            .id_token_signing_alg_values_supported
            .iter()
            .filter_map(|name| Algorithm::from_str(name).ok())
            .filter(|alg| !matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512))
            .collect();
        if algorithms.is_empty() {
            algorithms.push(Algorithm::RS256);
        }

        let verifier = Self {
            issuer: metadata.issuer,
            client_id: client_id.to_string(),
            jwks_uri,
            algorithms,
            client,
            keys: RwLock::new(HashMap::new()),
            last_refresh: Mutex::new(None),
        };

        let loaded = verifier.refresh_keys().await?;
        if loaded == 0 {
            return Err(DiscoveryError::NoSigningKeys {
                url: verifier.jwks_uri.to_string(),
            });
        }

        tracing::info!(
            issuer = %verifier.issuer,
            jwks_uri = %verifier.jwks_uri,
            keys = loaded,
            "Identity provider discovered"
        );

        Ok(verifier)
    }

    async fn refresh_keys(&self) -> Result<usize, DiscoveryError> {
        let set: JwkSet = fetch_json(&self.client, self.jwks_uri.as_str()).await?;

        let keys: HashMap<String, Arc<DecodingKey>> = set
            .keys
            .iter()
            .enumerate()
            .filter_map(|(index, jwk)| {
                let id = jwk.kid.clone().unwrap_or_else(|| format!("#{index}"));
                jwk.decoding_key().map(|key| (id, Arc::new(key)))
            })
            .collect();

        let loaded = keys.len();
        *self.keys.write().unwrap_or_else(PoisonError::into_inner) = keys;
        *self.last_refresh.lock().await = Some(Instant::now());
        Ok(loaded)
    }

    /// Refresh the key set unless it was refreshed recently.
    async fn refresh_if_stale(&self) {
        let mut last = self.last_refresh.lock().await;
        if last.is_some_and(|at| at.elapsed() < JWKS_REFRESH_INTERVAL) {
            return;
        }
        // Mark first so concurrent callers waiting on the lock skip the download.
        *last = Some(Instant::now());
        drop(last);

        if let Err(e) = self.refresh_keys().await {
            tracing::warn!(jwks_uri = %self.jwks_uri, error = %e, "Key set refresh failed");
        }
    }

    fn candidate_keys(&self, kid: Option<&str>) -> Vec<Arc<DecodingKey>> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        match kid {
            Some(kid) => keys.get(kid).cloned().into_iter().collect(),
            None => keys.values().cloned().collect(),
        }
    }
}

#[async_trait]
impl TokenVerifier for OidcVerifier {
    async fn verify(&self, raw_token: &str) -> Result<(), GatewayError> {
        let header = decode_header(raw_token)
            .map_err(|e| GatewayError::TokenVerificationFailed(format!("malformed header: {e}")))?;

        if !self.algorithms.contains(&header.alg) {
            return Err(GatewayError::TokenVerificationFailed(format!(
                "algorithm {:?} not supported by provider",
                header.alg
            )));
        }

        let mut keys = self.candidate_keys(header.kid.as_deref());
        if keys.is_empty() {
            self.refresh_if_stale().await;
            keys = self.candidate_keys(header.kid.as_deref());
        }
        if keys.is_empty() {
            return Err(GatewayError::TokenVerificationFailed(format!(
                "no signing key for kid {:?}",
                header.kid
            )));
        }

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.client_id]);

        let mut last_error = None;
        for key in keys {
            match decode::<serde_json::Value>(raw_token, &key, &validation) {
                Ok(_) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
        }

        Err(GatewayError::TokenVerificationFailed(
            last_error.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }
}

async fn fetch_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> Result<T, DiscoveryError> {
    let http_error = |source| DiscoveryError::Http {
        url: url.to_string(),
        source,
    };
    client
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(http_error)?
        .json::<T>()
        .await
        .map_err(http_error)
}

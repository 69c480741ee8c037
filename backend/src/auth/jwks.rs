use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;

use super::{ExternalClaims, IdentityVerifier, VerifyError};
use crate::config::GoogleConfig;

/// Minimum spacing between JWKS refetches triggered by unknown key ids.
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// JWKS key set response.
#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    #[allow(dead_code)]
    alg: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

/// Google ID token claims. `email` and `name` depend on the requested
/// scopes, so their absence is reported explicitly rather than by serde.
#[derive(Debug, Deserialize)]
struct GoogleClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
    #[serde(default)]
    azp: Option<String>,
}

struct KeyCache {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Option<Instant>,
}

/// Verifies Google ID tokens against Google's published JWKS.
///
/// Keys are fetched lazily and refetched when a token names an unknown
/// `kid`, so provider key rotation needs no restart.
pub struct GoogleVerifier {
    http_client: Client,
    certs_url: String,
    issuers: Vec<String>,
    client_id: String,
    refresh_interval: Duration,
    cache: RwLock<KeyCache>,
}

impl GoogleVerifier {
    pub fn new(config: &GoogleConfig) -> Self {
        Self {
            http_client: Client::new(),
            certs_url: config.certs_url.clone(),
            issuers: config.issuers.clone(),
            client_id: config.client_id.clone(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            cache: RwLock::new(KeyCache {
                keys: HashMap::new(),
                fetched_at: None,
            }),
        }
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    async fn refresh_keys(&self) -> Result<(), VerifyError> {
        let mut cache = self.cache.write().await;
        // Another request may have refreshed while we waited for the lock.
        if let Some(fetched_at) = cache.fetched_at {
            if fetched_at.elapsed() < self.refresh_interval {
                return Ok(());
            }
        }

        tracing::info!("Fetching JWKS from {}", self.certs_url);

        let response: JwksResponse = self
            .http_client
            .get(&self.certs_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| VerifyError::JwksFetchError(e.to_string()))?
            .json()
            .await
            .map_err(|e| VerifyError::JwksFetchError(e.to_string()))?;

        cache.keys.clear();
        for jwk in response.keys {
            if jwk.kty == "RSA" {
                if let (Some(n), Some(e)) = (&jwk.n, &jwk.e) {
                    match DecodingKey::from_rsa_components(n, e) {
                        Ok(key) => {
                            cache.keys.insert(jwk.kid.clone(), key);
                        }
                        Err(e) => {
                            tracing::warn!("Failed to parse RSA key {}: {}", jwk.kid, e);
                        }
                    }
                }
            }
        }
        cache.fetched_at = Some(Instant::now());

        tracing::info!("Loaded {} JWKS keys", cache.keys.len());
        Ok(())
    }

    async fn key_for(&self, kid: &str) -> Result<DecodingKey, VerifyError> {
        if let Some(key) = self.cache.read().await.keys.get(kid) {
            return Ok(key.clone());
        }

        self.refresh_keys().await?;

        self.cache
            .read()
            .await
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| VerifyError::KeyNotFound(kid.to_string()))
    }
}

#[async_trait]
impl IdentityVerifier for GoogleVerifier {
    async fn verify(&self, token: &str, audience: &str) -> Result<ExternalClaims, VerifyError> {
        let header = decode_header(token).map_err(|e| VerifyError::InvalidToken(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| VerifyError::InvalidToken("Missing kid in token header".to_string()))?;

        let key = self.key_for(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(self.issuers.as_slice());
        validation.set_audience(&[audience]);

        let claims = decode::<GoogleClaims>(token, &key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => VerifyError::Expired,
                _ => VerifyError::InvalidToken(e.to_string()),
            })?
            .claims;

        if claims.azp.as_deref() != Some(self.client_id.as_str()) {
            return Err(VerifyError::UnauthorizedClient);
        }

        Ok(ExternalClaims {
            subject: required(Some(claims.sub), "sub")?,
            email: required(claims.email, "email")?,
            display_name: required(claims.name, "name")?,
            picture: claims.picture.filter(|p| !p.trim().is_empty()),
        })
    }
}

/// Blank identity claims count as missing.
fn required(value: Option<String>, claim: &'static str) -> Result<String, VerifyError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(VerifyError::MissingClaim(claim))
}

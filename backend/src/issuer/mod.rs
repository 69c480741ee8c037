//! Access and refresh token issuance.
//!
//! Refresh tokens are persisted as [`RefreshCredentialRecord`]s before being
//! signed with RS512. Access tokens are not persisted and are signed with
//! RS256. The signing key is fetched from a [`SigningKeyProvider`] on every
//! issuance.

pub mod keys;

pub use keys::{CachedKeyProvider, FileKeyProvider, KeyError, SigningKeyProvider, StaticKeyProvider};

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::config::TokensConfig;
use crate::models::{token_lifetime, Account, DeviceDescriptor, RefreshCredentialRecord, MAX_TTL_SECS};
use crate::store::{CredentialStore, StoreError};

/// Refresh tokens use the stronger hash.
pub const REFRESH_ALGORITHM: Algorithm = Algorithm::RS512;
pub const ACCESS_ALGORITHM: Algorithm = Algorithm::RS256;

#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("Signing key unavailable: {0}")]
    SigningKeyUnavailable(String),
    #[error("Failed to sign token: {0}")]
    SignatureFailure(String),
    #[error("Token lifetime of {0}s is outside 1..={max}s", max = MAX_TTL_SECS)]
    InvalidLifetime(u64),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Token issuance timed out")]
    DeadlineExceeded,
}

/// Distinguishes access from refresh use in the `typ` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    AccessToken,
    RefreshToken,
}

/// Claims embedded in every token this service signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Token id; the record id for refresh tokens.
    pub jti: String,
    /// Account id.
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub typ: TokenType,
}

/// A signed token together with the claims it carries.
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub claims: TokenClaims,
}

impl SignedToken {
    /// Lifetime actually signed into the token, `exp - iat`.
    pub fn lifetime_secs(&self) -> u64 {
        u64::try_from(self.claims.exp - self.claims.iat).unwrap_or(0)
    }
}

/// Fixed identifiers stamped into issued tokens.
#[derive(Debug, Clone)]
pub struct IssuerSettings {
    pub issuer: String,
    pub audience: String,
    pub signing_key_name: String,
}

impl From<&TokensConfig> for IssuerSettings {
    fn from(config: &TokensConfig) -> Self {
        Self {
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            signing_key_name: config.signing_key_name.clone(),
        }
    }
}

/// Mints signed tokens for accounts.
pub struct CredentialIssuer {
    keys: Arc<dyn SigningKeyProvider>,
    store: Arc<dyn CredentialStore>,
    settings: IssuerSettings,
}

impl CredentialIssuer {
    pub fn new(
        keys: Arc<dyn SigningKeyProvider>,
        store: Arc<dyn CredentialStore>,
        settings: IssuerSettings,
    ) -> Self {
        Self {
            keys,
            store,
            settings,
        }
    }

    /// Persist a refresh token record for `account` and return it signed.
    ///
    /// The record is written before the key is fetched, so a key or signing
    /// failure leaves an unsigned record behind. An out-of-range `ttl_secs`
    /// is rejected before anything is written.
    pub async fn issue_refresh_credential(
        &self,
        account: &Account,
        ttl_secs: u64,
        device: &DeviceDescriptor,
    ) -> Result<SignedToken, IssueError> {
        let ttl = token_lifetime(ttl_secs).ok_or(IssueError::InvalidLifetime(ttl_secs))?;
        let record = RefreshCredentialRecord::new(account.id.clone(), ttl, device, Utc::now());
        self.store.create(&record).await?;

        let claims = TokenClaims {
            jti: record.id.clone(),
            sub: record.account_id.clone(),
            iss: self.settings.issuer.clone(),
            aud: self.settings.audience.clone(),
            iat: record.created_at.timestamp(),
            exp: record.expires_at.timestamp(),
            typ: TokenType::RefreshToken,
        };

        let token = self.sign(&claims, REFRESH_ALGORITHM).await?;
        tracing::debug!(token_id = %record.id, account_id = %account.id, "Issued refresh token");
        Ok(SignedToken { token, claims })
    }

    /// Sign a fresh access token for `account`. Nothing is persisted.
    pub async fn issue_access_credential(
        &self,
        account: &Account,
        ttl_secs: u64,
    ) -> Result<SignedToken, IssueError> {
        let ttl = token_lifetime(ttl_secs).ok_or(IssueError::InvalidLifetime(ttl_secs))?;
        let iat = Utc::now().timestamp();
        let claims = TokenClaims {
            jti: uuid::Uuid::new_v4().to_string(),
            sub: account.id.clone(),
            iss: self.settings.issuer.clone(),
            aud: self.settings.audience.clone(),
            iat,
            exp: iat + ttl.num_seconds(),
            typ: TokenType::AccessToken,
        };

        let token = self.sign(&claims, ACCESS_ALGORITHM).await?;
        tracing::debug!(token_id = %claims.jti, account_id = %account.id, "Issued access token");
        Ok(SignedToken { token, claims })
    }

    async fn sign(&self, claims: &TokenClaims, algorithm: Algorithm) -> Result<String, IssueError> {
        let key_name = &self.settings.signing_key_name;
        let pem = self
            .keys
            .fetch_signing_key(key_name)
            .await
            .map_err(|e| IssueError::SigningKeyUnavailable(e.to_string()))?;
        let key = EncodingKey::from_rsa_pem(&pem).map_err(|e| {
            IssueError::SigningKeyUnavailable(format!("{key_name} is not an RSA private key: {e}"))
        })?;

        let header = Header {
            alg: algorithm,
            kid: Some(key_name.clone()),
            ..Default::default()
        };

        encode(&header, claims, &key).map_err(|e| IssueError::SignatureFailure(e.to_string()))
    }
}

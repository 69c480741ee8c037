//! Verification of provider identity tokens.

pub mod jwks;

pub use jwks::GoogleVerifier;

use async_trait::async_trait;

/// Typed identity extracted from a verified provider token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalClaims {
    /// Provider-scoped subject id.
    pub subject: String,
    pub email: String,
    pub display_name: String,
    pub picture: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("Token has been expired.")]
    Expired,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("Client application is not authorized by our server")]
    UnauthorizedClient,
    #[error("Missing claim: {0}")]
    MissingClaim(&'static str),
    #[error("JWKS fetch error: {0}")]
    JwksFetchError(String),
    #[error("Key not found for kid: {0}")]
    KeyNotFound(String),
    #[error("Identity verification timed out")]
    DeadlineExceeded,
}

/// Validates a provider token's signature, issuer and audience.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str, audience: &str) -> Result<ExternalClaims, VerifyError>;
}

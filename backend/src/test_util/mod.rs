//! Fixtures shared by unit and integration tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

use crate::auth::{ExternalClaims, IdentityVerifier, VerifyError};
use crate::config::{
    Config, DatabaseConfig, GoogleConfig, LoggingConfig, SecretsConfig, ServerConfig,
    SignInConfig, TokensConfig,
};

/// RSA key pair the service signs its own tokens with.
pub const SERVICE_PRIVATE_KEY: &str = include_str!("keys/service_private.pem");
pub const SERVICE_PUBLIC_KEY: &str = include_str!("keys/service_public.pem");

/// RSA key pair standing in for the identity provider.
pub const PROVIDER_PRIVATE_KEY: &str = include_str!("keys/provider_private.pem");
pub const PROVIDER_JWKS: &str = include_str!("keys/provider_jwks.json");
pub const PROVIDER_KID: &str = "provider-test-key";

pub const TEST_SERVER_ID: &str = "test-server.apps.googleusercontent.com";
pub const TEST_CLIENT_ID: &str = "test-client.apps.googleusercontent.com";

pub fn provider_jwks() -> serde_json::Value {
    serde_json::from_str(PROVIDER_JWKS).expect("Invalid provider JWKS fixture")
}

/// Sign arbitrary claims with the provider key, the way Google would.
pub fn provider_id_token(claims: &serde_json::Value, kid: &str) -> String {
    let key = EncodingKey::from_rsa_pem(PROVIDER_PRIVATE_KEY.as_bytes())
        .expect("Invalid provider key fixture");
    let header = Header {
        alg: Algorithm::RS256,
        kid: Some(kid.to_string()),
        ..Default::default()
    };
    encode(&header, claims, &key).expect("Failed to encode JWT")
}

/// Configuration pointing at `certs_url`, with an in-memory database.
pub fn test_config(certs_url: &str) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        database: DatabaseConfig {
            url: ":memory:".to_string(),
        },
        google: GoogleConfig {
            server_id: TEST_SERVER_ID.to_string(),
            client_id: TEST_CLIENT_ID.to_string(),
            certs_url: certs_url.to_string(),
            issuers: vec![
                "accounts.google.com".to_string(),
                "https://accounts.google.com".to_string(),
            ],
        },
        tokens: TokensConfig::default(),
        secrets: SecretsConfig::default(),
        signin: SignInConfig::default(),
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
    }
}

pub fn external_claims(subject: &str, email: &str, name: &str) -> ExternalClaims {
    ExternalClaims {
        subject: subject.to_string(),
        email: email.to_string(),
        display_name: name.to_string(),
        picture: None,
    }
}

/// Verifier that accepts a fixed set of tokens for one audience.
///
/// Tokens it does not know, or presented for another audience, are rejected.
pub struct StaticVerifier {
    audience: String,
    tokens: HashMap<String, ExternalClaims>,
    calls: Mutex<usize>,
}

impl StaticVerifier {
    pub fn new(audience: impl Into<String>) -> Self {
        Self {
            audience: audience.into(),
            tokens: HashMap::new(),
            calls: Mutex::new(0),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>, claims: ExternalClaims) -> Self {
        self.tokens.insert(token.into(), claims);
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().expect("poisoned")
    }
}

#[async_trait]
impl IdentityVerifier for StaticVerifier {
    async fn verify(&self, token: &str, audience: &str) -> Result<ExternalClaims, VerifyError> {
        *self.calls.lock().expect("poisoned") += 1;
        if audience != self.audience {
            return Err(VerifyError::InvalidToken("InvalidAudience".to_string()));
        }
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| VerifyError::InvalidToken("unknown token".to_string()))
    }
}

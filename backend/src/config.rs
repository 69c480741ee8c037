//! Configuration for the sign-in service.

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

use crate::models::{token_lifetime, MAX_TTL_SECS};

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub google: GoogleConfig,
    #[serde(default)]
    pub tokens: TokensConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub signin: SignInConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite location; accepts a `sqlite:` prefix and `:memory:`.
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

/// Google identity provider settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    /// Expected `aud` of inbound ID tokens (the server's OAuth client id).
    pub server_id: String,
    /// Expected `azp` of inbound ID tokens (the mobile/web client id).
    pub client_id: String,
    /// JWKS endpoint for Google's signing keys.
    #[serde(default = "default_certs_url")]
    pub certs_url: String,
    /// Accepted `iss` values.
    #[serde(default = "default_google_issuers")]
    pub issuers: Vec<String>,
}

/// Settings for the tokens this service mints.
#[derive(Debug, Clone, Deserialize)]
pub struct TokensConfig {
    /// `iss` claim of issued tokens.
    #[serde(default = "default_token_issuer")]
    pub issuer: String,
    /// `aud` claim of issued tokens.
    #[serde(default = "default_token_audience")]
    pub audience: String,
    /// Name of the private key fetched from the secret provider.
    #[serde(default = "default_signing_key_name")]
    pub signing_key_name: String,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_secs: u64,
    #[serde(default = "default_access_ttl")]
    pub access_ttl_secs: u64,
    /// When false, responses carry an empty access token and `expires_in = 0`.
    #[serde(default = "default_true")]
    pub issue_access_token: bool,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            issuer: default_token_issuer(),
            audience: default_token_audience(),
            signing_key_name: default_signing_key_name(),
            refresh_ttl_secs: default_refresh_ttl(),
            access_ttl_secs: default_access_ttl(),
            issue_access_token: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecretsConfig {
    /// Directory holding `<name>.pem` private keys.
    #[serde(default = "default_secrets_dir")]
    pub dir: String,
    /// Signing key cache lifetime; 0 fetches the key on every issuance.
    #[serde(default)]
    pub cache_ttl_secs: u64,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            dir: default_secrets_dir(),
            cache_ttl_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignInConfig {
    /// Deadline for a whole sign-in (verify, resolve, issue).
    #[serde(default = "default_signin_timeout")]
    pub timeout_secs: u64,
}

impl Default for SignInConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_signin_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_database_url() -> String {
    "sqlite:./data/signin.db".to_string()
}
fn default_certs_url() -> String {
    "https://www.googleapis.com/oauth2/v3/certs".to_string()
}
fn default_google_issuers() -> Vec<String> {
    vec![
        "accounts.google.com".to_string(),
        "https://accounts.google.com".to_string(),
    ]
}
fn default_token_issuer() -> String {
    "repair-shop-management-authorizer".to_string()
}
fn default_token_audience() -> String {
    "repair-shop-management-server".to_string()
}
fn default_signing_key_name() -> String {
    "jwt-priv-key".to_string()
}
fn default_refresh_ttl() -> u64 {
    // six months
    15_768_000
}
fn default_access_ttl() -> u64 {
    86_400
}
fn default_true() -> bool {
    true
}
fn default_secrets_dir() -> String {
    "./secrets".to_string()
}
fn default_signin_timeout() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (SIGNIN__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(File::with_name("config").required(false))
    }

    fn load_from(file: File<config::FileSourceFile, config::FileFormat>) -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .add_source(file)
            .add_source(
                Environment::with_prefix("SIGNIN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let lifetimes = [
            ("tokens.refresh_ttl_secs", self.tokens.refresh_ttl_secs),
            ("tokens.access_ttl_secs", self.tokens.access_ttl_secs),
        ];
        for (key, secs) in lifetimes {
            if token_lifetime(secs).is_none() {
                return Err(ConfigError::Message(format!(
                    "{key} must be between 1 and {MAX_TTL_SECS}, got {secs}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_tokens_config() {
        let tokens = TokensConfig::default();
        assert_eq!(tokens.issuer, "repair-shop-management-authorizer");
        assert_eq!(tokens.audience, "repair-shop-management-server");
        assert_eq!(tokens.signing_key_name, "jwt-priv-key");
        assert_eq!(tokens.refresh_ttl_secs, 15_768_000);
        assert_eq!(tokens.access_ttl_secs, 86_400);
        assert!(tokens.issue_access_token);
    }

    #[test]
    fn test_default_server_and_secrets() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8080);
        let secrets = SecretsConfig::default();
        assert_eq!(secrets.cache_ttl_secs, 0);
    }

    #[test]
    fn test_load_from_file_fills_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[google]
server_id = "server.apps.googleusercontent.com"
client_id = "client.apps.googleusercontent.com"

[tokens]
access_ttl_secs = 900
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = Config::load_from(File::with_name(&path)).unwrap();

        assert_eq!(config.google.server_id, "server.apps.googleusercontent.com");
        assert_eq!(config.google.issuers.len(), 2);
        assert_eq!(config.tokens.access_ttl_secs, 900);
        assert_eq!(config.tokens.refresh_ttl_secs, 15_768_000);
        assert_eq!(config.signin.timeout_secs, 10);
        assert_eq!(config.logging.level, "info");
    }

    fn load_tokens_section(section: &str) -> Result<Config, ConfigError> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[google]\nserver_id = \"s\"\nclient_id = \"c\"\n\n[tokens]\n{section}"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();
        Config::load_from(File::with_name(&path))
    }

    #[test]
    fn test_zero_token_lifetime_is_rejected() {
        let err = load_tokens_section("access_ttl_secs = 0").unwrap_err();
        assert!(err.to_string().contains("tokens.access_ttl_secs"));

        let err = load_tokens_section("refresh_ttl_secs = 0").unwrap_err();
        assert!(err.to_string().contains("tokens.refresh_ttl_secs"));
    }

    #[test]
    fn test_oversized_token_lifetime_is_rejected() {
        let section = format!("refresh_ttl_secs = {}", MAX_TTL_SECS + 1);
        let err = load_tokens_section(&section).unwrap_err();
        assert!(err.to_string().contains("tokens.refresh_ttl_secs"));

        let section = format!("access_ttl_secs = {MAX_TTL_SECS}");
        assert_eq!(load_tokens_section(&section).unwrap().tokens.access_ttl_secs, MAX_TTL_SECS);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = load_tokens_section("").unwrap();
        assert!(config.validate().is_ok());
    }
}

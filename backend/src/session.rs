//! Sign-in orchestration.
//!
//! Each call to [`SessionOrchestrator::sign_in`] walks the same state machine:
//!
//! ```text
//! Received -> Dispatched -> Verifying -> Resolving -> Issuing -> Completed
//!                  |             |            |           |
//!                  +-------------+------------+-----------+--> Rejected(reason)
//! ```
//!
//! Nothing is retried. The whole pipeline runs under one deadline; when it
//! elapses the request is rejected as a failure of the stage in progress.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use signin_common::{SignInRequest, TokenResponse};

use crate::agent::AgentParser;
use crate::auth::{IdentityVerifier, VerifyError};
use crate::config::Config;
use crate::error::{RejectReason, SignInError};
use crate::issuer::{CredentialIssuer, IssueError};
use crate::resolver::{IdentityResolver, ResolveError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInState {
    Received,
    Dispatched,
    Verifying,
    Resolving,
    Issuing,
    Completed,
    Rejected(RejectReason),
}

/// Identity providers the service accepts tokens from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Google,
}

impl FromStr for Provider {
    type Err = SignInError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("google") {
            Ok(Provider::Google)
        } else {
            Err(SignInError::UnsupportedProvider(s.to_string()))
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Audience inbound provider tokens must be addressed to.
    pub audience: String,
    pub refresh_ttl_secs: u64,
    pub access_ttl_secs: u64,
    /// When false the response carries an empty access token and `expires_in = 0`.
    pub issue_access_token: bool,
    pub timeout: Duration,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            audience: config.google.server_id.clone(),
            refresh_ttl_secs: config.tokens.refresh_ttl_secs,
            access_ttl_secs: config.tokens.access_ttl_secs,
            issue_access_token: config.tokens.issue_access_token,
            timeout: Duration::from_secs(config.signin.timeout_secs),
        }
    }
}

/// Result of one sign-in attempt and the states it went through.
#[derive(Debug)]
pub struct SignInOutcome {
    pub result: Result<TokenResponse, SignInError>,
    pub trace: Vec<SignInState>,
}

impl SignInOutcome {
    pub fn final_state(&self) -> SignInState {
        self.trace.last().copied().unwrap_or(SignInState::Received)
    }

    pub fn into_result(self) -> Result<TokenResponse, SignInError> {
        self.result
    }
}

pub struct SessionOrchestrator {
    google: Arc<dyn IdentityVerifier>,
    resolver: IdentityResolver,
    issuer: CredentialIssuer,
    agents: Arc<dyn AgentParser>,
    settings: SessionSettings,
}

fn transition(trace: &mut Vec<SignInState>, state: SignInState) {
    tracing::debug!(state = ?state, "Sign-in state transition");
    trace.push(state);
}

impl SessionOrchestrator {
    pub fn new(
        google: Arc<dyn IdentityVerifier>,
        resolver: IdentityResolver,
        issuer: CredentialIssuer,
        agents: Arc<dyn AgentParser>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            google,
            resolver,
            issuer,
            agents,
            settings,
        }
    }

    pub async fn sign_in(&self, request: &SignInRequest, user_agent: &str) -> SignInOutcome {
        let mut trace = vec![SignInState::Received];

        let timed = tokio::time::timeout(
            self.settings.timeout,
            self.run(request, user_agent, &mut trace),
        )
        .await;
        let result = match timed {
            Ok(result) => result,
            Err(_) => Err(deadline_error(trace.last().copied())),
        };

        match &result {
            Ok(response) => {
                transition(&mut trace, SignInState::Completed);
                tracing::info!(
                    provider = %request.provider,
                    username = %response.user.username,
                    "Sign-in completed"
                );
            }
            Err(e) => {
                transition(&mut trace, SignInState::Rejected(e.reason()));
                tracing::warn!(
                    provider = %request.provider,
                    reason = ?e.reason(),
                    error = %e,
                    "Sign-in rejected"
                );
            }
        }

        SignInOutcome { result, trace }
    }

    async fn run(
        &self,
        request: &SignInRequest,
        user_agent: &str,
        trace: &mut Vec<SignInState>,
    ) -> Result<TokenResponse, SignInError> {
        transition(trace, SignInState::Dispatched);
        let verifier = match request.provider.parse::<Provider>()? {
            Provider::Google => &self.google,
        };

        transition(trace, SignInState::Verifying);
        let claims = verifier
            .verify(&request.token, &self.settings.audience)
            .await
            .map_err(SignInError::Unauthorized)?;

        transition(trace, SignInState::Resolving);
        let account = self
            .resolver
            .resolve(&claims)
            .await
            .map_err(SignInError::ProvisioningFailed)?;

        transition(trace, SignInState::Issuing);
        let device = self.agents.parse(user_agent);
        let refresh = self
            .issuer
            .issue_refresh_credential(&account, self.settings.refresh_ttl_secs, &device)
            .await
            .map_err(SignInError::IssuanceFailed)?;

        let mut response = TokenResponse::new(refresh.token, account.dto());
        if self.settings.issue_access_token {
            let access = self
                .issuer
                .issue_access_credential(&account, self.settings.access_ttl_secs)
                .await
                .map_err(SignInError::IssuanceFailed)?;
            // expires_in reports the lifetime actually signed into the token.
            let expires_in = access.lifetime_secs();
            response = response.with_access_token(access.token, expires_in);
        }

        Ok(response)
    }
}

/// Failure reported when the deadline elapses while in `state`.
fn deadline_error(state: Option<SignInState>) -> SignInError {
    match state {
        Some(SignInState::Resolving) => SignInError::ProvisioningFailed(ResolveError::DeadlineExceeded),
        Some(SignInState::Issuing) => SignInError::IssuanceFailed(IssueError::DeadlineExceeded),
        _ => SignInError::Unauthorized(VerifyError::DeadlineExceeded),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::BasicAgentParser;
    use crate::auth::{ExternalClaims, MockIdentityVerifier};
    use crate::issuer::{IssuerSettings, StaticKeyProvider, TokenClaims, TokenType};
    use crate::models::NewAccount;
    use crate::store::{
        AccountRepository, CredentialStore, Database, RepositoryError, SqliteAccountRepository,
        SqliteCredentialStore,
    };
    use crate::test_util::{
        external_claims, test_config, StaticVerifier, SERVICE_PRIVATE_KEY, SERVICE_PUBLIC_KEY,
        TEST_SERVER_ID,
    };
    use crate::models::MAX_TTL_SECS;
    use async_trait::async_trait;
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    const ANDROID_UA: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Mobile Safari/537.36";

    struct Fixture {
        orchestrator: SessionOrchestrator,
        db: Arc<Database>,
        accounts: Arc<SqliteAccountRepository>,
        credentials: Arc<SqliteCredentialStore>,
    }

    impl Fixture {
        fn refresh_token_rows(&self) -> i64 {
            self.db
                .lock()
                .unwrap()
                .query_row("SELECT COUNT(*) FROM refresh_tokens", [], |row| row.get(0))
                .unwrap()
        }
    }

    fn settings() -> SessionSettings {
        SessionSettings::from(&test_config("http://unused.invalid/certs"))
    }

    fn fixture_with(
        verifier: Arc<dyn IdentityVerifier>,
        keys: StaticKeyProvider,
        settings: SessionSettings,
    ) -> Fixture {
        let db = Arc::new(Database::in_memory().unwrap());
        let accounts = Arc::new(SqliteAccountRepository::new(db.clone()));
        let credentials = Arc::new(SqliteCredentialStore::new(db.clone()));
        let config = test_config("http://unused.invalid/certs");
        let issuer = CredentialIssuer::new(
            Arc::new(keys),
            credentials.clone(),
            IssuerSettings::from(&config.tokens),
        );
        let orchestrator = SessionOrchestrator::new(
            verifier,
            IdentityResolver::new(accounts.clone()),
            issuer,
            Arc::new(BasicAgentParser),
            settings,
        );
        Fixture {
            orchestrator,
            db,
            accounts,
            credentials,
        }
    }

    fn fixture(verifier: StaticVerifier) -> Fixture {
        fixture_with(
            Arc::new(verifier),
            StaticKeyProvider::new().with_key("jwt-priv-key", SERVICE_PRIVATE_KEY),
            settings(),
        )
    }

    fn request(token: &str, provider: &str) -> SignInRequest {
        SignInRequest {
            token: token.to_string(),
            provider: provider.to_string(),
        }
    }

    fn ada_verifier() -> StaticVerifier {
        StaticVerifier::new(TEST_SERVER_ID).with_token("ada-token", external_claims("ext-42", "a@x.com", "Ada"))
    }

    fn decode_refresh(token: &str) -> TokenClaims {
        let key = DecodingKey::from_rsa_pem(SERVICE_PUBLIC_KEY.as_bytes()).unwrap();
        let mut validation = Validation::new(Algorithm::RS512);
        validation.set_audience(&["repair-shop-management-server"]);
        decode::<TokenClaims>(token, &key, &validation).unwrap().claims
    }

    #[tokio::test]
    async fn test_first_sign_in_provisions_and_completes() {
        let f = fixture(ada_verifier());

        let outcome = f.orchestrator.sign_in(&request("ada-token", "google"), ANDROID_UA).await;
        assert_eq!(
            outcome.trace,
            vec![
                SignInState::Received,
                SignInState::Dispatched,
                SignInState::Verifying,
                SignInState::Resolving,
                SignInState::Issuing,
                SignInState::Completed,
            ]
        );

        let response = outcome.into_result().unwrap();
        assert!(!response.refresh_token.is_empty());
        assert!(!response.access_token.is_empty());
        assert_eq!(response.expires_in, 86_400);
        assert_eq!(response.token_type, "Bearer");
        assert_eq!(response.user.name, "Ada");
        assert_ne!(response.user.username, "ext-42");
        assert_ne!(response.user.username, "a@x.com");

        let account = f.accounts.find_by_external_identity("ext-42").await.unwrap();
        assert_eq!(account.username, response.user.username);

        let claims = decode_refresh(&response.refresh_token);
        assert_eq!(claims.sub, account.id);
        assert_eq!(claims.typ, TokenType::RefreshToken);
        assert_eq!(claims.exp - claims.iat, 15_768_000);

        let record = f.credentials.find_by_id(&claims.jti).await.unwrap().unwrap();
        assert_eq!(record.device, "Mobile");
        assert_eq!(record.os, "Android");
        assert_eq!(record.client_name, "Chrome");
    }

    #[tokio::test]
    async fn test_returning_user_gets_existing_account() {
        let f = fixture(ada_verifier());
        let existing = f
            .accounts
            .create(NewAccount::new("Ada L.", "u-ada", "ada@old.com", "ext-42").with_picture("https://p/ada"))
            .await
            .unwrap();

        let response = f
            .orchestrator
            .sign_in(&request("ada-token", "google"), "")
            .await
            .into_result()
            .unwrap();

        assert_eq!(response.user, existing.dto());
        assert_eq!(response.user.picture, "https://p/ada");
        // No second account was provisioned with the claims' email.
        assert!(f
            .accounts
            .create(NewAccount::new("X", "u-x", "a@x.com", "ext-x"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_provider_is_case_insensitive() {
        let f = fixture(ada_verifier());
        let outcome = f.orchestrator.sign_in(&request("ada-token", "GooGLE"), "").await;
        assert_eq!(outcome.final_state(), SignInState::Completed);
    }

    #[tokio::test]
    async fn test_unsupported_provider_never_verifies() {
        let mut verifier = MockIdentityVerifier::new();
        verifier.expect_verify().never();
        let f = fixture_with(
            Arc::new(verifier),
            StaticKeyProvider::new().with_key("jwt-priv-key", SERVICE_PRIVATE_KEY),
            settings(),
        );

        let outcome = f.orchestrator.sign_in(&request("ada-token", "facebook"), "").await;
        assert_eq!(
            outcome.trace,
            vec![
                SignInState::Received,
                SignInState::Dispatched,
                SignInState::Rejected(RejectReason::UnsupportedProvider),
            ]
        );
        assert!(matches!(
            outcome.result,
            Err(SignInError::UnsupportedProvider(p)) if p == "facebook"
        ));
    }

    #[tokio::test]
    async fn test_verifier_receives_configured_audience() {
        let mut verifier = MockIdentityVerifier::new();
        verifier
            .expect_verify()
            .withf(|token, audience| token == "ada-token" && audience == TEST_SERVER_ID)
            .times(1)
            .returning(|_, _| Ok(external_claims("ext-42", "a@x.com", "Ada")));
        let f = fixture_with(
            Arc::new(verifier),
            StaticKeyProvider::new().with_key("jwt-priv-key", SERVICE_PRIVATE_KEY),
            settings(),
        );

        let outcome = f.orchestrator.sign_in(&request("ada-token", "google"), "").await;
        assert_eq!(outcome.final_state(), SignInState::Completed);
        assert_eq!(f.refresh_token_rows(), 1);
    }

    #[tokio::test]
    async fn test_wrong_audience_is_rejected_without_side_effects() {
        let mut settings = settings();
        settings.audience = "another-server.apps.googleusercontent.com".to_string();
        let f = fixture_with(
            Arc::new(ada_verifier()),
            StaticKeyProvider::new().with_key("jwt-priv-key", SERVICE_PRIVATE_KEY),
            settings,
        );

        let outcome = f.orchestrator.sign_in(&request("ada-token", "google"), "").await;
        assert_eq!(
            outcome.final_state(),
            SignInState::Rejected(RejectReason::Unauthorized)
        );
        assert!(!outcome.trace.contains(&SignInState::Resolving));
        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.envelope().code, 401);

        assert!(matches!(
            f.accounts.find_by_external_identity_with_trashed("ext-42").await,
            Err(RepositoryError::NotFound)
        ));
        assert_eq!(f.refresh_token_rows(), 0);
    }

    #[tokio::test]
    async fn test_expires_in_matches_signed_access_lifetime() {
        let mut settings = settings();
        settings.access_ttl_secs = 600;
        let f = fixture_with(
            Arc::new(ada_verifier()),
            StaticKeyProvider::new().with_key("jwt-priv-key", SERVICE_PRIVATE_KEY),
            settings,
        );

        let response = f
            .orchestrator
            .sign_in(&request("ada-token", "google"), "")
            .await
            .into_result()
            .unwrap();
        assert_eq!(response.expires_in, 600);

        let key = DecodingKey::from_rsa_pem(SERVICE_PUBLIC_KEY.as_bytes()).unwrap();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&["repair-shop-management-server"]);
        let claims = decode::<TokenClaims>(&response.access_token, &key, &validation)
            .unwrap()
            .claims;
        assert_eq!((claims.exp - claims.iat) as u64, response.expires_in);
    }

    #[tokio::test]
    async fn test_out_of_range_access_lifetime_fails_issuance() {
        for ttl in [0, MAX_TTL_SECS + 1] {
            let mut settings = settings();
            settings.access_ttl_secs = ttl;
            let f = fixture_with(
                Arc::new(ada_verifier()),
                StaticKeyProvider::new().with_key("jwt-priv-key", SERVICE_PRIVATE_KEY),
                settings,
            );

            let outcome = f.orchestrator.sign_in(&request("ada-token", "google"), "").await;
            assert_eq!(
                outcome.final_state(),
                SignInState::Rejected(RejectReason::IssuanceFailed)
            );
            assert!(matches!(
                outcome.result,
                Err(SignInError::IssuanceFailed(IssueError::InvalidLifetime(t))) if t == ttl
            ));
        }
    }

    #[tokio::test]
    async fn test_out_of_range_refresh_lifetime_persists_nothing() {
        let mut settings = settings();
        settings.refresh_ttl_secs = 0;
        let f = fixture_with(
            Arc::new(ada_verifier()),
            StaticKeyProvider::new().with_key("jwt-priv-key", SERVICE_PRIVATE_KEY),
            settings,
        );

        let outcome = f.orchestrator.sign_in(&request("ada-token", "google"), "").await;
        assert!(matches!(
            outcome.result,
            Err(SignInError::IssuanceFailed(IssueError::InvalidLifetime(0)))
        ));
        assert_eq!(f.refresh_token_rows(), 0);
    }

    #[tokio::test]
    async fn test_access_token_can_be_withheld() {
        let mut settings = settings();
        settings.issue_access_token = false;
        let f = fixture_with(
            Arc::new(ada_verifier()),
            StaticKeyProvider::new().with_key("jwt-priv-key", SERVICE_PRIVATE_KEY),
            settings,
        );

        let response = f
            .orchestrator
            .sign_in(&request("ada-token", "google"), "")
            .await
            .into_result()
            .unwrap();
        assert_eq!(response.access_token, "");
        assert_eq!(response.expires_in, 0);
        assert!(!response.refresh_token.is_empty());
    }

    #[tokio::test]
    async fn test_missing_signing_key_fails_issuance() {
        let f = fixture_with(Arc::new(ada_verifier()), StaticKeyProvider::new(), settings());

        let outcome = f.orchestrator.sign_in(&request("ada-token", "google"), "").await;
        assert_eq!(
            outcome.final_state(),
            SignInState::Rejected(RejectReason::IssuanceFailed)
        );
        assert!(matches!(
            outcome.result,
            Err(SignInError::IssuanceFailed(IssueError::SigningKeyUnavailable(_)))
        ));

        // Account and the unsigned refresh record remain.
        let account = f.accounts.find_by_external_identity("ext-42").await.unwrap();
        assert_eq!(f.credentials.list_for_account(&account.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_provisioning_collision_is_rejected() {
        let f = fixture(ada_verifier());
        f.accounts
            .create(NewAccount::new("Someone", "u-1", "a@x.com", "ext-other"))
            .await
            .unwrap();

        let outcome = f.orchestrator.sign_in(&request("ada-token", "google"), "").await;
        assert_eq!(
            outcome.final_state(),
            SignInState::Rejected(RejectReason::ProvisioningFailed)
        );
        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.message(), "Error creating user");
    }

    struct SlowVerifier;

    #[async_trait]
    impl IdentityVerifier for SlowVerifier {
        async fn verify(&self, _token: &str, _audience: &str) -> Result<ExternalClaims, VerifyError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(external_claims("ext-slow", "slow@x.com", "Slow"))
        }
    }

    #[tokio::test]
    async fn test_deadline_rejects_interrupted_stage() {
        let mut settings = settings();
        settings.timeout = Duration::from_millis(50);
        let f = fixture_with(
            Arc::new(SlowVerifier),
            StaticKeyProvider::new().with_key("jwt-priv-key", SERVICE_PRIVATE_KEY),
            settings,
        );

        let outcome = f.orchestrator.sign_in(&request("t", "google"), "").await;
        assert_eq!(
            outcome.trace,
            vec![
                SignInState::Received,
                SignInState::Dispatched,
                SignInState::Verifying,
                SignInState::Rejected(RejectReason::Unauthorized),
            ]
        );
        assert!(matches!(
            outcome.result,
            Err(SignInError::Unauthorized(VerifyError::DeadlineExceeded))
        ));
    }

    #[test]
    fn test_deadline_error_follows_state() {
        assert_eq!(
            deadline_error(Some(SignInState::Resolving)).reason(),
            RejectReason::ProvisioningFailed
        );
        assert_eq!(
            deadline_error(Some(SignInState::Issuing)).reason(),
            RejectReason::IssuanceFailed
        );
        assert_eq!(
            deadline_error(Some(SignInState::Verifying)).reason(),
            RejectReason::Unauthorized
        );
    }

    #[test]
    fn test_settings_from_config() {
        let settings = settings();
        assert_eq!(settings.audience, TEST_SERVER_ID);
        assert_eq!(settings.refresh_ttl_secs, 15_768_000);
        assert_eq!(settings.timeout, Duration::from_secs(10));
        assert!(settings.issue_access_token);
    }
}

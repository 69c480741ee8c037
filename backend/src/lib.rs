pub mod agent;
pub mod auth;
pub mod config;
pub mod error;
pub mod issuer;
pub mod logging;
pub mod models;
pub mod resolver;
pub mod routes;
pub mod session;
pub mod store;
pub mod test_util;

pub use agent::{AgentParser, BasicAgentParser};
pub use auth::{ExternalClaims, GoogleVerifier, IdentityVerifier, VerifyError};
pub use config::Config;
pub use error::{RejectReason, RequestError, SignInError};
pub use issuer::{CredentialIssuer, IssueError, IssuerSettings, SigningKeyProvider};
pub use resolver::{IdentityResolver, ResolveError};
pub use session::{SessionOrchestrator, SessionSettings, SignInOutcome, SignInState};
pub use store::{
    AccountRepository, CredentialStore, Database, SqliteAccountRepository, SqliteCredentialStore,
};

use std::sync::Arc;

use axum::{middleware, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub orchestrator: SessionOrchestrator,
}

/// Wire the sign-in pipeline over the shared database and the given capabilities.
pub fn build_orchestrator(
    config: &Config,
    db: Arc<Database>,
    verifier: Arc<dyn IdentityVerifier>,
    keys: Arc<dyn SigningKeyProvider>,
) -> SessionOrchestrator {
    let accounts = Arc::new(SqliteAccountRepository::new(db.clone()));
    let credentials = Arc::new(SqliteCredentialStore::new(db));
    assemble_orchestrator(config, accounts, credentials, verifier, keys)
}

/// Wire the sign-in pipeline over arbitrary storage implementations.
pub fn assemble_orchestrator(
    config: &Config,
    accounts: Arc<dyn AccountRepository>,
    credentials: Arc<dyn CredentialStore>,
    verifier: Arc<dyn IdentityVerifier>,
    keys: Arc<dyn SigningKeyProvider>,
) -> SessionOrchestrator {
    let issuer = CredentialIssuer::new(keys, credentials, IssuerSettings::from(&config.tokens));

    SessionOrchestrator::new(
        verifier,
        IdentityResolver::new(accounts),
        issuer,
        Arc::new(BasicAgentParser),
        SessionSettings::from(config),
    )
}

/// HTTP router with CORS, tracing and request logging applied.
pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health::router())
        .merge(routes::signin::router(state))
        .layer(middleware::from_fn(logging::request_logger))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

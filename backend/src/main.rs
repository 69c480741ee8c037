use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use signin_backend::issuer::{CachedKeyProvider, FileKeyProvider};
use signin_backend::{app, build_orchestrator, AppState, Config, Database, GoogleVerifier};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| config.logging.level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting sign-in service");

    // Initialize components
    let db = Arc::new(Database::open(&config.database.url)?);
    tracing::info!("Opened database at {}", config.database.url);

    let keys = Arc::new(CachedKeyProvider::new(
        Arc::new(FileKeyProvider::new(&config.secrets.dir)),
        Duration::from_secs(config.secrets.cache_ttl_secs),
    ));
    let verifier = Arc::new(GoogleVerifier::new(&config.google));
    let orchestrator = build_orchestrator(&config, db, verifier, keys);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState {
        config,
        orchestrator,
    });

    // Start server
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app(state)).await?;

    Ok(())
}

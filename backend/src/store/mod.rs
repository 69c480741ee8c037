//! SQLite-backed persistence for accounts and refresh tokens.
//!
//! A single [`Database`] handle is opened at startup and shared (via `Arc`)
//! by the [`SqliteAccountRepository`] and the [`SqliteCredentialStore`].

pub mod accounts;
pub mod credentials;

pub use accounts::{AccountRepository, RepositoryError, SqliteAccountRepository};
pub use credentials::{CredentialStore, SqliteCredentialStore};

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

/// How long a writer waits for another connection's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("IO error: {0}")]
    IoError(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

/// Shared SQLite connection.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(database_url: &str) -> Result<Self, StoreError> {
        // Parse sqlite: prefix if present
        let path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| StoreError::IoError(e.to_string()))?;
                }
            }
            Connection::open(path)?
        };

        conn.busy_timeout(BUSY_TIMEOUT)?;
        migrate(&conn)?;

        tracing::info!("Database initialized: {}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))
    }
}

/// Uniqueness of username/email/external id is enforced by the repository,
/// so the indexes below are deliberately non-unique.
fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            username TEXT NOT NULL,
            email TEXT NOT NULL,
            external_identity_id TEXT NOT NULL,
            picture_url TEXT NOT NULL DEFAULT '',
            blocked INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS refresh_tokens (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            device TEXT NOT NULL,
            os TEXT NOT NULL,
            client_name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_accounts_username ON accounts(username)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_accounts_email ON accounts(email)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_accounts_external_identity ON accounts(external_identity_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_account_id ON refresh_tokens(account_id)",
        [],
    )?;

    Ok(())
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn to_sql_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn from_sql_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

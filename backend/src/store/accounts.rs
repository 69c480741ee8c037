//! Account repository.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::{from_sql_time, to_sql_time, Database, StoreError};
use crate::models::{Account, NewAccount};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Account not found")]
    NotFound,
    #[error("username has been picked by another account")]
    DuplicateUsername,
    #[error("email has been picked by another account")]
    DuplicateEmail,
    #[error("external identity has been registered by another account")]
    DuplicateExternalIdentity,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RepositoryError {
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            RepositoryError::DuplicateUsername
                | RepositoryError::DuplicateEmail
                | RepositoryError::DuplicateExternalIdentity
        )
    }
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(e: rusqlite::Error) -> Self {
        RepositoryError::Store(e.into())
    }
}

/// Storage of account records.
///
/// Ordinary lookups never return soft-deleted accounts; the `*_with_trashed`
/// variants and `find_by_id(.., true)` do.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// First live account linked to `external_id`.
    async fn find_by_external_identity(&self, external_id: &str) -> Result<Account, RepositoryError>;

    /// Like `find_by_external_identity`, but soft-deleted accounts are visible.
    async fn find_by_external_identity_with_trashed(
        &self,
        external_id: &str,
    ) -> Result<Account, RepositoryError>;

    async fn find_by_id(&self, id: &str, include_trashed: bool) -> Result<Account, RepositoryError>;

    /// Insert a new account. Collisions are checked in the order username,
    /// email, external identity, atomically with the insert.
    async fn create(&self, candidate: NewAccount) -> Result<Account, RepositoryError>;

    /// Replace all mutable fields and refresh `updated_at`.
    async fn update(&self, account: &Account) -> Result<Account, RepositoryError>;

    /// Mark as deleted. Calling it again keeps the first deletion time.
    async fn soft_delete(&self, id: &str) -> Result<(), RepositoryError>;

    /// Clear the deletion mark.
    async fn restore(&self, id: &str) -> Result<(), RepositoryError>;

    /// Physically remove the record.
    async fn delete(&self, id: &str) -> Result<(), RepositoryError>;
}

const ACCOUNT_COLUMNS: &str = "id, display_name, username, email, external_identity_id, \
     picture_url, blocked, created_at, updated_at, deleted_at";

/// Fields checked for collisions at creation time, in precedence order.
#[derive(Debug, Clone, Copy)]
enum UniqueField {
    Username,
    Email,
    ExternalIdentity,
}

impl UniqueField {
    const ORDER: [UniqueField; 3] = [
        UniqueField::Username,
        UniqueField::Email,
        UniqueField::ExternalIdentity,
    ];

    fn exists_sql(self) -> &'static str {
        match self {
            UniqueField::Username => "SELECT 1 FROM accounts WHERE username = ?1 LIMIT 1",
            UniqueField::Email => "SELECT 1 FROM accounts WHERE email = ?1 LIMIT 1",
            UniqueField::ExternalIdentity => {
                "SELECT 1 FROM accounts WHERE external_identity_id = ?1 LIMIT 1"
            }
        }
    }

    fn value(self, candidate: &NewAccount) -> &str {
        match self {
            UniqueField::Username => &candidate.username,
            UniqueField::Email => &candidate.email,
            UniqueField::ExternalIdentity => &candidate.external_identity_id,
        }
    }

    fn collision(self) -> RepositoryError {
        match self {
            UniqueField::Username => RepositoryError::DuplicateUsername,
            UniqueField::Email => RepositoryError::DuplicateEmail,
            UniqueField::ExternalIdentity => RepositoryError::DuplicateExternalIdentity,
        }
    }
}

/// SQLite implementation of [`AccountRepository`].
pub struct SqliteAccountRepository {
    db: Arc<Database>,
}

impl SqliteAccountRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;
    let deleted_at: Option<String> = row.get(9)?;

    Ok(Account {
        id: row.get(0)?,
        display_name: row.get(1)?,
        username: row.get(2)?,
        email: row.get(3)?,
        external_identity_id: row.get(4)?,
        picture_url: row.get(5)?,
        blocked: row.get::<_, i32>(6)? != 0,
        created_at: from_sql_time(7, &created_at)?,
        updated_at: from_sql_time(8, &updated_at)?,
        deleted_at: deleted_at
            .map(|raw| from_sql_time(9, &raw))
            .transpose()?,
    })
}

fn select_by_id(conn: &Connection, id: &str) -> Result<Option<Account>, RepositoryError> {
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id], account_from_row)
        .optional()?)
}

/// `now`, but never earlier than `floor`.
fn not_before(floor: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().max(floor)
}

#[async_trait]
impl AccountRepository for SqliteAccountRepository {
    async fn find_by_external_identity(&self, external_id: &str) -> Result<Account, RepositoryError> {
        let conn = self.db.lock()?;
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts
             WHERE external_identity_id = ?1 AND deleted_at IS NULL
             ORDER BY created_at, rowid LIMIT 1"
        );
        conn.query_row(&sql, params![external_id], account_from_row)
            .optional()?
            .ok_or(RepositoryError::NotFound)
    }

    async fn find_by_external_identity_with_trashed(
        &self,
        external_id: &str,
    ) -> Result<Account, RepositoryError> {
        let conn = self.db.lock()?;
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts
             WHERE external_identity_id = ?1
             ORDER BY created_at, rowid LIMIT 1"
        );
        conn.query_row(&sql, params![external_id], account_from_row)
            .optional()?
            .ok_or(RepositoryError::NotFound)
    }

    async fn find_by_id(&self, id: &str, include_trashed: bool) -> Result<Account, RepositoryError> {
        let conn = self.db.lock()?;
        match select_by_id(&conn, id)? {
            Some(account) if include_trashed || !account.is_trashed() => Ok(account),
            _ => Err(RepositoryError::NotFound),
        }
    }

    async fn create(&self, candidate: NewAccount) -> Result<Account, RepositoryError> {
        let mut conn = self.db.lock()?;
        // IMMEDIATE takes the write lock up front, so the existence checks and
        // the insert cannot interleave with another connection's create.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for field in UniqueField::ORDER {
            let taken = tx
                .query_row(field.exists_sql(), params![field.value(&candidate)], |_| Ok(()))
                .optional()?
                .is_some();
            if taken {
                tracing::debug!(?field, "Account creation rejected: duplicate");
                return Err(field.collision());
            }
        }

        let account = candidate.into_account(uuid::Uuid::new_v4().to_string(), Utc::now());
        tx.execute(
            "INSERT INTO accounts (id, display_name, username, email, external_identity_id,
                                   picture_url, blocked, created_at, updated_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL)",
            params![
                account.id,
                account.display_name,
                account.username,
                account.email,
                account.external_identity_id,
                account.picture_url,
                account.blocked as i32,
                to_sql_time(account.created_at),
                to_sql_time(account.updated_at),
            ],
        )?;
        tx.commit()?;

        tracing::info!(account_id = %account.id, "Created account");
        Ok(account)
    }

    async fn update(&self, account: &Account) -> Result<Account, RepositoryError> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = select_by_id(&tx, &account.id)?.ok_or(RepositoryError::NotFound)?;
        let updated_at = not_before(current.updated_at);

        tx.execute(
            "UPDATE accounts SET display_name = ?1, username = ?2, email = ?3,
                    external_identity_id = ?4, picture_url = ?5, blocked = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                account.display_name,
                account.username,
                account.email,
                account.external_identity_id,
                account.picture_url,
                account.blocked as i32,
                to_sql_time(updated_at),
                account.id,
            ],
        )?;
        let stored = select_by_id(&tx, &account.id)?.ok_or(RepositoryError::NotFound)?;
        tx.commit()?;

        tracing::debug!(account_id = %stored.id, "Updated account");
        Ok(stored)
    }

    async fn soft_delete(&self, id: &str) -> Result<(), RepositoryError> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = select_by_id(&tx, id)?.ok_or(RepositoryError::NotFound)?;
        if current.deleted_at.is_none() {
            let deleted_at = not_before(current.created_at);
            tx.execute(
                "UPDATE accounts SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
                params![to_sql_time(deleted_at), id],
            )?;
        }
        tx.commit()?;

        tracing::info!(account_id = %id, "Soft-deleted account");
        Ok(())
    }

    async fn restore(&self, id: &str) -> Result<(), RepositoryError> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = select_by_id(&tx, id)?.ok_or(RepositoryError::NotFound)?;
        if current.deleted_at.is_some() {
            tx.execute(
                "UPDATE accounts SET deleted_at = NULL, updated_at = ?1 WHERE id = ?2",
                params![to_sql_time(not_before(current.updated_at)), id],
            )?;
        }
        tx.commit()?;

        tracing::info!(account_id = %id, "Restored account");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        let conn = self.db.lock()?;
        let removed = conn.execute("DELETE FROM accounts WHERE id = ?1", params![id])?;
        if removed == 0 {
            return Err(RepositoryError::NotFound);
        }

        tracing::info!(account_id = %id, "Deleted account");
        Ok(())
    }
}

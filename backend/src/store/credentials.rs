//! Refresh token records.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, Row};

use super::{from_sql_time, to_sql_time, Database, StoreError};
use crate::models::RefreshCredentialRecord;

/// Storage of issued refresh tokens. Records are immutable once written.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn create(&self, record: &RefreshCredentialRecord) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<RefreshCredentialRecord>, StoreError>;

    /// All records owned by an account, newest first.
    async fn list_for_account(
        &self,
        account_id: &str,
    ) -> Result<Vec<RefreshCredentialRecord>, StoreError>;

    /// Revoke a record. Returns whether anything was removed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

const RECORD_COLUMNS: &str = "id, account_id, expires_at, device, os, client_name, created_at";

/// SQLite implementation of [`CredentialStore`].
pub struct SqliteCredentialStore {
    db: Arc<Database>,
}

impl SqliteCredentialStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<RefreshCredentialRecord> {
    let expires_at: String = row.get(2)?;
    let created_at: String = row.get(6)?;

    Ok(RefreshCredentialRecord {
        id: row.get(0)?,
        account_id: row.get(1)?,
        expires_at: from_sql_time(2, &expires_at)?,
        device: row.get(3)?,
        os: row.get(4)?,
        client_name: row.get(5)?,
        created_at: from_sql_time(6, &created_at)?,
    })
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn create(&self, record: &RefreshCredentialRecord) -> Result<(), StoreError> {
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO refresh_tokens (id, account_id, expires_at, device, os, client_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.account_id,
                to_sql_time(record.expires_at),
                record.device,
                record.os,
                record.client_name,
                to_sql_time(record.created_at),
            ],
        )?;

        tracing::debug!(token_id = %record.id, account_id = %record.account_id, "Stored refresh token");
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<RefreshCredentialRecord>, StoreError> {
        let conn = self.db.lock()?;
        let sql = format!("SELECT {RECORD_COLUMNS} FROM refresh_tokens WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], record_from_row).optional()?)
    }

    async fn list_for_account(
        &self,
        account_id: &str,
    ) -> Result<Vec<RefreshCredentialRecord>, StoreError> {
        let conn = self.db.lock()?;
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM refresh_tokens
             WHERE account_id = ?1 ORDER BY created_at DESC, rowid DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![account_id], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.db.lock()?;
        let removed = conn.execute("DELETE FROM refresh_tokens WHERE id = ?1", params![id])?;
        if removed > 0 {
            tracing::info!(token_id = %id, "Revoked refresh token");
        }
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceDescriptor;
    use chrono::{Duration, Utc};

    fn store() -> SqliteCredentialStore {
        SqliteCredentialStore::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn device(os: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            device: "Desktop".to_string(),
            os: os.to_string(),
            client_name: "Firefox".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = store();
        let record = RefreshCredentialRecord::new("acc-1", Duration::hours(1), &device("Linux"), Utc::now());
        store.create(&record).await.unwrap();

        let found = store.find_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(found, record);
    }

    #[tokio::test]
    async fn test_find_missing_returns_none() {
        let store = store();
        assert!(store.find_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_is_a_store_error() {
        let store = store();
        let record = RefreshCredentialRecord::new("acc-1", Duration::hours(1), &device("Linux"), Utc::now());
        store.create(&record).await.unwrap();
        let err = store.create(&record).await.unwrap_err();
        assert!(matches!(err, StoreError::DatabaseError(_)));
    }

    #[tokio::test]
    async fn test_multiple_devices_per_account_newest_first() {
        let store = store();
        let now = Utc::now();
        let older = RefreshCredentialRecord::new("acc-1", Duration::hours(1), &device("Linux"), now - Duration::minutes(5));
        let newer = RefreshCredentialRecord::new("acc-1", Duration::hours(1), &device("Android"), now);
        let other = RefreshCredentialRecord::new("acc-2", Duration::hours(1), &device("iOS"), now);
        for r in [&older, &newer, &other] {
            store.create(r).await.unwrap();
        }

        let listed = store.list_for_account("acc-1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);
    }

    #[tokio::test]
    async fn test_delete_revokes() {
        let store = store();
        let record = RefreshCredentialRecord::new("acc-1", Duration::hours(1), &device("Linux"), Utc::now());
        store.create(&record).await.unwrap();

        assert!(store.delete(&record.id).await.unwrap());
        assert!(!store.delete(&record.id).await.unwrap());
        assert!(store.find_by_id(&record.id).await.unwrap().is_none());
    }
}

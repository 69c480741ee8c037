//! Signing key retrieval.
//!
//! Keys are PEM-encoded RSA private keys looked up by name. The default
//! [`FileKeyProvider`] reads the key on every call so a rotated key is picked
//! up without a restart; [`CachedKeyProvider`] adds a time-bounded cache on
//! top of any provider.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("Signing key not found: {0}")]
    NotFound(String),
    #[error("Invalid signing key name: {0}")]
    InvalidName(String),
    #[error("Failed to read signing key: {0}")]
    Io(String),
}

/// Source of the current private signing key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SigningKeyProvider: Send + Sync {
    async fn fetch_signing_key(&self, name: &str) -> Result<Vec<u8>, KeyError>;
}

/// Reads `<dir>/<name>.pem` from disk.
pub struct FileKeyProvider {
    dir: PathBuf,
}

impl FileKeyProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SigningKeyProvider for FileKeyProvider {
    async fn fetch_signing_key(&self, name: &str) -> Result<Vec<u8>, KeyError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(KeyError::InvalidName(name.to_string()));
        }

        let path = self.dir.join(format!("{name}.pem"));
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(KeyError::NotFound(name.to_string()))
            }
            Err(e) => Err(KeyError::Io(format!("{}: {}", path.display(), e))),
        }
    }
}

/// Fixed in-memory keys.
#[derive(Default)]
pub struct StaticKeyProvider {
    keys: HashMap<String, Vec<u8>>,
}

impl StaticKeyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, name: impl Into<String>, pem: impl Into<Vec<u8>>) -> Self {
        self.keys.insert(name.into(), pem.into());
        self
    }
}

#[async_trait]
impl SigningKeyProvider for StaticKeyProvider {
    async fn fetch_signing_key(&self, name: &str) -> Result<Vec<u8>, KeyError> {
        self.keys
            .get(name)
            .cloned()
            .ok_or_else(|| KeyError::NotFound(name.to_string()))
    }
}

/// Caches keys from an inner provider for `ttl`. A zero ttl disables caching.
pub struct CachedKeyProvider {
    inner: Arc<dyn SigningKeyProvider>,
    ttl: Duration,
    cache: RwLock<HashMap<String, (Instant, Vec<u8>)>>,
}

impl CachedKeyProvider {
    pub fn new(inner: Arc<dyn SigningKeyProvider>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SigningKeyProvider for CachedKeyProvider {
    async fn fetch_signing_key(&self, name: &str) -> Result<Vec<u8>, KeyError> {
        if self.ttl.is_zero() {
            return self.inner.fetch_signing_key(name).await;
        }

        if let Some((fetched_at, key)) = self.cache.read().await.get(name) {
            if fetched_at.elapsed() < self.ttl {
                return Ok(key.clone());
            }
        }

        let key = self.inner.fetch_signing_key(name).await?;
        self.cache
            .write()
            .await
            .insert(name.to_string(), (Instant::now(), key.clone()));
        tracing::debug!(key = %name, "Refreshed cached signing key");
        Ok(key)
    }
}

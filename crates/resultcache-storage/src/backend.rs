//! Entry store trait

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::error::StorageError;

/// Maximum key length in bytes; keys become file names
pub const MAX_KEY_LENGTH: usize = 255;

/// Deferred computation of a missing entry's payload.
///
/// The future is only polled on a cache miss, so building one is cheap.
pub type Provider = BoxFuture<'static, anyhow::Result<Bytes>>;

/// Key and timestamp of one persisted entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

/// Key-addressable persistent store for cached entries.
///
/// The store knows nothing about expiry or capacity. Callers are expected to
/// serialize operations on the same key themselves.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Enumerate every persisted entry
    async fn list_entries(&self) -> Result<Vec<EntryMeta>, StorageError>;

    /// Number of persisted entries
    async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.list_entries().await?.len())
    }

    /// Check if an entry exists
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Last write time of an entry
    async fn last_modified(&self, key: &str) -> Result<DateTime<Utc>, StorageError>;

    /// Read an entry's payload
    async fn read(&self, key: &str) -> Result<Bytes, StorageError>;

    /// Write (or overwrite) an entry's payload
    async fn write(&self, key: &str, data: Bytes) -> Result<(), StorageError>;

    /// Delete an entry; returns `false` if it did not exist
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Return the stored payload, or run `provider` and persist its result
    async fn get_or_populate(&self, key: &str, provider: Provider) -> Result<Bytes, StorageError> {
        match self.read(key).await {
            Ok(data) => return Ok(data),
            Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let data = provider.await.map_err(|source| StorageError::Provider {
            key: key.to_string(),
            source,
        })?;
        self.write(key, data.clone()).await?;
        Ok(data)
    }
}

/// Validate a cache key before it is turned into a file name
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let invalid = key.is_empty()
        || key.len() > MAX_KEY_LENGTH
        || key == "."
        || key == ".."
        || key.contains(['/', '\\', '\0']);

    if invalid {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] resultcache_storage::StorageError),

    /// The provider computing a missing entry failed; the error is its own
    #[error("Provider failed for {key}: {source}")]
    Provider {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl CoreError {
    /// Lift a provider failure out of the storage error it travelled in
    pub(crate) fn from_populate(err: resultcache_storage::StorageError) -> Self {
        match err {
            resultcache_storage::StorageError::Provider { key, source } => {
                CoreError::Provider { key, source }
            }
            other => CoreError::Storage(other),
        }
    }
}

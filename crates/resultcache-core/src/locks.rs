//! Per-key mutual exclusion
//!
//! Every operation that reads, populates or deletes the entry for a key runs
//! while holding that key's lock. Handles are created on first use and
//! dropped again once nobody holds or waits for them.
//!
//! The locks are not reentrant. Code holding a key's lock must never try to
//! acquire the same key again; the access path and the collector each take
//! at most one key lock at a time.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// Table of per-key locks
#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Proof that a key's lock is held; releases it on drop
pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock for `key`
    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let handle = {
            let mut locks = self.locks.lock();
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        trace!("Waiting for key lock {}", key);
        let guard = handle.lock_owned().await;

        KeyGuard {
            locks: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Run `operation` while holding the lock for `key`
    pub async fn with_lock<F, Fut, T>(&self, key: &str, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.lock(key).await;
        operation().await
    }

    /// Number of keys that currently have a lock handle
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }

    fn release(&self, key: &str) {
        let mut locks = self.locks.lock();
        // New clones are only made under the table lock, so a count of one
        // means no task holds or waits on this handle.
        if let Some(handle) = locks.get(key)
            && Arc::strong_count(handle) == 1
        {
            locks.remove(key);
        }
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.key);
    }
}

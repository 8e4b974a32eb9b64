//! Shared helpers for the crate's tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use filetime::FileTime;
use parking_lot::Mutex;
use resultcache_storage::{EntryMeta, EntryStore, LocalStore, StorageError};
use tempfile::TempDir;

use crate::notifier::ExpirationNotifier;

pub(crate) async fn temp_store() -> (TempDir, Arc<LocalStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path()).await.unwrap();
    (dir, Arc::new(store))
}

/// Write an entry whose last-modified time lies `age` in the past
pub(crate) async fn put_entry(store: &LocalStore, key: &str, age: Duration) {
    store
        .write(key, Bytes::from(format!("payload of {}", key)))
        .await
        .unwrap();
    backdate(store, key, age);
}

pub(crate) fn backdate(store: &LocalStore, key: &str, age: Duration) {
    let mtime = SystemTime::now() - age;
    filetime::set_file_mtime(
        store.entry_path(key).unwrap(),
        FileTime::from_system_time(mtime),
    )
    .unwrap();
}

pub(crate) async fn keys(store: &dyn EntryStore) -> Vec<String> {
    let mut keys: Vec<String> = store
        .list_entries()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.key)
        .collect();
    keys.sort();
    keys
}

/// Subscribe a listener that records every evicted key
pub(crate) fn record_events(notifier: &ExpirationNotifier) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    notifier.subscribe(move |key: &str| {
        sink.lock().push(key.to_string());
        Ok(())
    });
    seen
}

/// Store wrapper that tracks how many enumerations run at once
pub(crate) struct InstrumentedStore {
    inner: Arc<LocalStore>,
    listing_delay: Duration,
    in_flight: AtomicUsize,
    pub(crate) max_in_flight: AtomicUsize,
}

impl InstrumentedStore {
    pub(crate) fn new(inner: Arc<LocalStore>, listing_delay: Duration) -> Self {
        Self {
            inner,
            listing_delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EntryStore for InstrumentedStore {
    async fn list_entries(&self) -> Result<Vec<EntryMeta>, StorageError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.listing_delay).await;
        let result = self.inner.list_entries().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.exists(key).await
    }

    async fn last_modified(&self, key: &str) -> Result<DateTime<Utc>, StorageError> {
        self.inner.last_modified(key).await
    }

    async fn read(&self, key: &str) -> Result<Bytes, StorageError> {
        self.inner.read(key).await
    }

    async fn write(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
        self.inner.write(key, data).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.delete(key).await
    }
}

/// Store wrapper that injects failures and concurrent rewrites
pub(crate) struct FaultyStore {
    inner: Arc<LocalStore>,
    failing_delete: Option<String>,
    failing_last_modified: bool,
    phantom_entries: usize,
    rewrite_after_listing: Option<(String, usize)>,
    listings: AtomicUsize,
}

impl FaultyStore {
    pub(crate) fn new(inner: Arc<LocalStore>) -> Self {
        Self {
            inner,
            failing_delete: None,
            failing_last_modified: false,
            phantom_entries: 0,
            rewrite_after_listing: None,
            listings: AtomicUsize::new(0),
        }
    }

    /// Make `delete` fail for `key`
    pub(crate) fn failing_delete(mut self, key: &str) -> Self {
        self.failing_delete = Some(key.to_string());
        self
    }

    /// Make every `last_modified` call fail with an IO error
    pub(crate) fn failing_last_modified(mut self) -> Self {
        self.failing_last_modified = true;
        self
    }

    /// Report `n` more entries from `count` than `list_entries` returns
    pub(crate) fn phantom_entries(mut self, n: usize) -> Self {
        self.phantom_entries = n;
        self
    }

    /// Rewrite `key` right after the `nth` listing (1-based) has been taken
    pub(crate) fn rewrite_after_listing(mut self, key: &str, nth: usize) -> Self {
        self.rewrite_after_listing = Some((key.to_string(), nth));
        self
    }
}

fn injected() -> StorageError {
    StorageError::Io(std::io::Error::other("injected failure"))
}

#[async_trait]
impl EntryStore for FaultyStore {
    async fn list_entries(&self) -> Result<Vec<EntryMeta>, StorageError> {
        let nth = self.listings.fetch_add(1, Ordering::SeqCst) + 1;
        let entries = self.inner.list_entries().await?;
        if let Some((key, at)) = &self.rewrite_after_listing
            && *at == nth
        {
            self.inner
                .write(key, Bytes::from_static(b"rewritten"))
                .await?;
        }
        Ok(entries)
    }

    async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.inner.count().await? + self.phantom_entries)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.exists(key).await
    }

    async fn last_modified(&self, key: &str) -> Result<DateTime<Utc>, StorageError> {
        if self.failing_last_modified {
            return Err(injected());
        }
        self.inner.last_modified(key).await
    }

    async fn read(&self, key: &str) -> Result<Bytes, StorageError> {
        self.inner.read(key).await
    }

    async fn write(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
        self.inner.write(key, data).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        if self.failing_delete.as_deref() == Some(key) {
            return Err(injected());
        }
        self.inner.delete(key).await
    }
}

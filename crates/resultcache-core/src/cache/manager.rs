//! Expiring cache front end

use bytes::Bytes;
use chrono::Utc;
use futures::FutureExt;
use parking_lot::RwLock;
use resultcache_storage::{validate_key, EntryStore, Provider, StorageError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::collector::{spawn_collector_task, CollectorHandle, GarbageCollector, SweepReport};
use super::policy::{is_expired_by_age, EvictionReason};
use crate::config::{CacheConfig, SharedConfig};
use crate::error::CoreError;
use crate::locks::KeyLocks;
use crate::notifier::{ExpirationNotifier, SubscriptionId};

/// Disk-backed cache with age and entry-count limits.
///
/// Every read, population and deletion of a key runs under that key's lock,
/// so concurrent callers never race each other or the collector. Cloning is
/// cheap and clones share all state.
#[derive(Clone)]
pub struct ExpiringCache {
    store: Arc<dyn EntryStore>,
    locks: Arc<KeyLocks>,
    notifier: Arc<ExpirationNotifier>,
    config: SharedConfig,
    collector: Arc<GarbageCollector>,
}

impl ExpiringCache {
    /// Create a cache with its own expiration notifier
    pub fn new(store: Arc<dyn EntryStore>, config: CacheConfig) -> Self {
        Self::with_notifier(store, config, Arc::new(ExpirationNotifier::new()))
    }

    /// Create a cache publishing evictions to a shared notifier
    pub fn with_notifier(
        store: Arc<dyn EntryStore>,
        config: CacheConfig,
        notifier: Arc<ExpirationNotifier>,
    ) -> Self {
        info!(
            "Initializing expiring cache (max_entries: {:?}, max_age: {:?}, gc_interval: {:?})",
            config.max_entries, config.max_age, config.gc_interval
        );

        let config: SharedConfig = Arc::new(RwLock::new(config));
        let locks = Arc::new(KeyLocks::new());
        let collector = Arc::new(GarbageCollector::new(
            store.clone(),
            locks.clone(),
            notifier.clone(),
            config.clone(),
        ));

        Self {
            store,
            locks,
            notifier,
            config,
            collector,
        }
    }

    pub fn notifier(&self) -> &Arc<ExpirationNotifier> {
        &self.notifier
    }

    pub fn collector(&self) -> &Arc<GarbageCollector> {
        &self.collector
    }

    /// Listen for evicted keys
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.notifier.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    /// Current configuration
    pub fn config(&self) -> CacheConfig {
        self.config.read().clone()
    }

    /// Replace the whole configuration
    pub fn configure(&self, config: CacheConfig) {
        info!(
            "Reconfiguring cache (max_entries: {:?}, max_age: {:?}, gc_interval: {:?})",
            config.max_entries, config.max_age, config.gc_interval
        );
        *self.config.write() = config;
    }

    pub fn set_max_entries(&self, max_entries: Option<usize>) {
        self.config.write().max_entries = max_entries;
    }

    pub fn set_max_age(&self, max_age: Option<Duration>) {
        self.config.write().max_age = max_age;
    }

    /// Takes effect from the collector's next cycle
    pub fn set_gc_interval(&self, gc_interval: Duration) {
        self.config.write().gc_interval = gc_interval;
    }

    /// Number of entries currently stored
    pub async fn len(&self) -> Result<usize, CoreError> {
        Ok(self.store.count().await?)
    }

    pub async fn is_empty(&self) -> Result<bool, CoreError> {
        Ok(self.len().await? == 0)
    }

    /// Get the entry for `key`, computing it with `provider` on a miss.
    ///
    /// Returns `Ok(None)` for an empty or otherwise unusable key. An expired
    /// entry is removed first and then recomputed. Concurrent calls for the
    /// same key run the provider at most once. Provider failures are returned
    /// as [`CoreError::Provider`].
    pub async fn get<Fut>(&self, key: &str, provider: Fut) -> Result<Option<Bytes>, CoreError>
    where
        Fut: Future<Output = anyhow::Result<Bytes>> + Send + 'static,
    {
        if let Err(e) = validate_key(key) {
            debug!("Ignoring lookup: {}", e);
            return Ok(None);
        }

        if let Err(e) = self.possibly_purge(key).await {
            warn!("Error purging cache entry {}: {}", key, e);
        }

        let provider: Provider = async move {
            metrics::counter!("resultcache_populations_total").increment(1);
            provider.await
        }
        .boxed();

        let value = self
            .locks
            .with_lock(key, || self.store.get_or_populate(key, provider))
            .await
            .map_err(CoreError::from_populate)?;

        self.maybe_trigger_sweep();

        Ok(Some(value))
    }

    /// Remove `key` now and notify listeners
    pub async fn invalidate(&self, key: &str) -> Result<bool, CoreError> {
        validate_key(key).map_err(|_| CoreError::InvalidKey(key.to_string()))?;

        let removed = self
            .locks
            .with_lock(key, || {
                self.collector
                    .remove_entry(key, EvictionReason::Invalidated)
            })
            .await?;
        Ok(removed)
    }

    /// Run a full sweep now, waiting for a running one to finish first
    pub async fn run_sweep(&self) -> Result<SweepReport, CoreError> {
        self.collector.run_sweep().await
    }

    /// Start the periodic background sweep
    pub fn start_collector(&self) -> CollectorHandle {
        spawn_collector_task(self.collector.clone())
    }

    /// Delete `key` if it has outlived the configured max age.
    ///
    /// The unlocked check skips the key lock for fresh entries; the decision
    /// is made again under the lock.
    async fn possibly_purge(&self, key: &str) -> Result<bool, StorageError> {
        let max_age = self.config.read().max_age;
        if max_age.is_none() {
            return Ok(false);
        }

        if !self.store.exists(key).await? {
            return Ok(false);
        }

        let last_modified = match self.store.last_modified(key).await {
            Ok(t) => t,
            Err(StorageError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        if !is_expired_by_age(last_modified, max_age, Utc::now()) {
            return Ok(false);
        }

        debug!("Purging expired entry {}", key);
        let purged = self
            .locks
            .with_lock(key, || self.collector.expire_if_stale(key, max_age))
            .await?;
        if purged {
            metrics::counter!("resultcache_purges_total").increment(1);
        }
        Ok(purged)
    }

    /// Kick off a sweep in the background when over capacity.
    ///
    /// Best-effort: skipped when a sweep seems to be running or no runtime is
    /// available.
    fn maybe_trigger_sweep(&self) {
        if self.config.read().max_entries.is_none() || self.collector.is_running() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No tokio runtime, skipping opportunistic sweep");
            return;
        };

        let collector = self.collector.clone();
        runtime.spawn(async move {
            match collector.over_capacity().await {
                Ok(true) => {
                    if let Some(Err(e)) = collector.try_run_sweep().await {
                        warn!("Error during opportunistic sweep: {}", e);
                    }
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to check cache capacity: {}", e),
            }
        });
    }
}

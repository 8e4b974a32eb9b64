//! Garbage collection of expired and surplus entries

use chrono::Utc;
use resultcache_storage::{EntryMeta, EntryStore, StorageError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use super::policy::{
    is_expired_by_age, is_over_capacity, select_eviction_candidate, EvictionReason,
};
use crate::config::SharedConfig;
use crate::error::CoreError;
use crate::locks::KeyLocks;
use crate::notifier::ExpirationNotifier;

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries seen during the age pass
    pub scanned: usize,
    /// Entries removed for being too old
    pub expired: usize,
    /// Entries removed for capacity (never more than one)
    pub evicted: usize,
    /// Entries that could not be checked or removed
    pub failures: usize,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.expired + self.evicted
    }
}

/// Sweeps the store, one sweep at a time
pub struct GarbageCollector {
    store: Arc<dyn EntryStore>,
    locks: Arc<KeyLocks>,
    notifier: Arc<ExpirationNotifier>,
    config: SharedConfig,
    sweep_lock: AsyncMutex<()>,
}

impl GarbageCollector {
    pub(crate) fn new(
        store: Arc<dyn EntryStore>,
        locks: Arc<KeyLocks>,
        notifier: Arc<ExpirationNotifier>,
        config: SharedConfig,
    ) -> Self {
        Self {
            store,
            locks,
            notifier,
            config,
            sweep_lock: AsyncMutex::new(()),
        }
    }

    /// Run a sweep, waiting for any sweep already in progress to finish first
    pub async fn run_sweep(&self) -> Result<SweepReport, CoreError> {
        let _guard = self.sweep_lock.lock().await;
        self.sweep().await
    }

    /// Run a sweep unless one is already in progress
    pub async fn try_run_sweep(&self) -> Option<Result<SweepReport, CoreError>> {
        let Ok(_guard) = self.sweep_lock.try_lock() else {
            debug!("Sweep already in progress, skipping");
            return None;
        };
        Some(self.sweep().await)
    }

    /// Best-effort check whether a sweep holds the collection lock
    pub fn is_running(&self) -> bool {
        self.sweep_lock.try_lock().is_err()
    }

    /// Whether the store currently holds more entries than allowed
    pub async fn over_capacity(&self) -> Result<bool, CoreError> {
        let max_entries = self.config.read().max_entries;
        if max_entries.is_none() {
            return Ok(false);
        }
        let count = self.store.count().await?;
        Ok(is_over_capacity(count, max_entries))
    }

    /// Delete `key` if it is older than `max_age`, re-reading its timestamp.
    ///
    /// The caller must hold the key's lock.
    pub(crate) async fn expire_if_stale(
        &self,
        key: &str,
        max_age: Option<Duration>,
    ) -> Result<bool, StorageError> {
        let last_modified = match self.store.last_modified(key).await {
            Ok(t) => t,
            Err(StorageError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        if !is_expired_by_age(last_modified, max_age, Utc::now()) {
            return Ok(false);
        }
        self.remove_entry(key, EvictionReason::Expired).await
    }

    /// Delete `key` and notify listeners if something was actually removed.
    ///
    /// The caller must hold the key's lock.
    pub(crate) async fn remove_entry(
        &self,
        key: &str,
        reason: EvictionReason,
    ) -> Result<bool, StorageError> {
        let deleted = self.store.delete(key).await?;
        if deleted {
            debug!("Removed cache entry {} ({})", key, reason);
            metrics::counter!("resultcache_evictions_total", "reason" => reason.as_str())
                .increment(1);
            self.notifier.publish(key);
        }
        Ok(deleted)
    }

    /// Delete a capacity candidate unless it changed since it was listed.
    ///
    /// The caller must hold the key's lock.
    async fn evict_if_unchanged(&self, candidate: &EntryMeta) -> Result<bool, StorageError> {
        let last_modified = match self.store.last_modified(&candidate.key).await {
            Ok(t) => t,
            Err(StorageError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        if last_modified != candidate.last_modified {
            return Ok(false);
        }
        self.remove_entry(&candidate.key, EvictionReason::Capacity)
            .await
    }

    async fn sweep(&self) -> Result<SweepReport, CoreError> {
        metrics::counter!("resultcache_sweeps_total").increment(1);
        let mut report = SweepReport::default();

        let entries = self.store.list_entries().await?;
        report.scanned = entries.len();

        let max_age = self.config.read().max_age;
        if max_age.is_some() {
            for entry in &entries {
                let outcome = self
                    .locks
                    .with_lock(&entry.key, || self.expire_if_stale(&entry.key, max_age))
                    .await;

                match outcome {
                    Ok(true) => report.expired += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Failed to expire cache entry {}: {}", entry.key, e);
                        report.failures += 1;
                    }
                }
            }
        }

        self.evict_for_capacity(&mut report).await;

        if report.removed() > 0 {
            info!(
                "Sweep complete: {} scanned, {} expired, {} evicted",
                report.scanned, report.expired, report.evicted
            );
        } else {
            debug!("Sweep complete: {} scanned, nothing removed", report.scanned);
        }

        Ok(report)
    }

    /// Evict the single oldest entry if the cache is over capacity.
    ///
    /// At most one entry goes per sweep; repeated sweeps converge on the limit.
    async fn evict_for_capacity(&self, report: &mut SweepReport) {
        match self.over_capacity().await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                warn!("Failed to count cache entries: {}", e);
                report.failures += 1;
                return;
            }
        }

        let entries = match self.store.list_entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to list cache entries for eviction: {}", e);
                report.failures += 1;
                return;
            }
        };

        let Some(oldest) = select_eviction_candidate(&entries) else {
            warn!("Cache is above max size, but no entries were found to evict");
            return;
        };

        let outcome = self
            .locks
            .with_lock(&oldest.key, || self.evict_if_unchanged(oldest))
            .await;

        match outcome {
            Ok(true) => report.evicted += 1,
            Ok(false) => debug!("Eviction candidate {} changed, skipping", oldest.key),
            Err(e) => {
                warn!("Failed to evict cache entry {}: {}", oldest.key, e);
                report.failures += 1;
            }
        }
    }
}

/// Handle to the background sweep task.
///
/// Dropping the handle stops the loop; `shutdown` also waits for it.
#[must_use = "dropping the handle stops the collector"]
pub struct CollectorHandle {
    cancel: DropGuard,
    handle: JoinHandle<()>,
}

impl CollectorHandle {
    /// Stop the loop and wait for it to exit.
    ///
    /// A sweep that is already running is allowed to finish.
    pub async fn shutdown(self) {
        self.cancel.disarm().cancel();
        if let Err(e) = self.handle.await {
            warn!("Cache collector task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Spawn a background task that sweeps the cache every configured interval.
///
/// The interval is re-read before each wait, so changes apply from the next
/// cycle on.
pub fn spawn_collector_task(collector: Arc<GarbageCollector>) -> CollectorHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    info!(
        "Starting background cache collector (interval: {:?})",
        collector.config.read().gc_interval
    );

    let handle = tokio::spawn(async move {
        loop {
            let interval = collector.config.read().gc_interval;

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            debug!("Running scheduled cache sweep");
            match collector.run_sweep().await {
                Ok(report) => {
                    if report.failures > 0 {
                        warn!("Scheduled sweep finished with {} failures", report.failures);
                    }
                }
                Err(e) => {
                    warn!("Error during scheduled sweep: {}", e);
                }
            }
        }

        info!("Cache collector stopped");
    });

    CollectorHandle {
        cancel: cancel.drop_guard(),
        handle,
    }
}

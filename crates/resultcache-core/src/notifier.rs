//! Eviction notifications
//!
//! Listeners are told the key of every entry this layer deletes. Delivery is
//! synchronous on the evicting task and best-effort: a listener that fails
//! or panics is logged and skipped, and eviction carries on.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

type Listener = Arc<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by [`ExpirationNotifier::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Broadcasts "key was evicted" events to subscribed listeners
#[derive(Default)]
pub struct ExpirationNotifier {
    listeners: RwLock<Vec<(SubscriptionId, Listener)>>,
    next_id: AtomicU64,
}

impl ExpirationNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; it is called for every eviction from now on
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        debug!("Registered expiration listener {:?}", id);
        id
    }

    /// Remove a listener; returns `false` if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver an eviction event for `key` to every listener, in
    /// registration order. Returns how many listeners accepted it.
    pub fn publish(&self, key: &str) -> usize {
        // Snapshot so a listener may (un)subscribe without deadlocking
        let listeners: Vec<(SubscriptionId, Listener)> = self.listeners.read().clone();
        let mut delivered = 0;

        for (id, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(key))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!("Expiration listener {:?} failed for {}: {}", id, key, e);
                }
                Err(_) => {
                    warn!("Expiration listener {:?} panicked for {}", id, key);
                }
            }
        }

        delivered
    }
}

//! Result Cache Core
//!
//! This crate coordinates access to the on-disk result cache: per-key
//! locking, age and entry-count eviction, the background collector and
//! eviction notifications.

pub mod cache;
pub mod config;
pub mod error;
pub mod locks;
pub mod notifier;

#[cfg(test)]
mod test_utils;

pub use cache::{
    spawn_collector_task, CollectorHandle, EvictionReason, ExpiringCache, GarbageCollector,
    SweepReport,
};
pub use config::{CacheConfig, DEFAULT_GC_INTERVAL};
pub use error::CoreError;
pub use locks::{KeyGuard, KeyLocks};
pub use notifier::{ExpirationNotifier, SubscriptionId};

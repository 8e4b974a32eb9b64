//! Runtime cache configuration
//!
//! The configuration is shared between the access path and the collector
//! behind a lock and may change at any time. A sweep reads whatever values
//! are current when it reaches each step.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

/// Interval between background sweeps when none is configured
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Eviction limits and sweep schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries; unbounded when `None`
    pub max_entries: Option<usize>,
    /// Maximum entry age; entries never expire when `None`
    pub max_age: Option<Duration>,
    /// Delay between two background sweeps
    pub gc_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: None,
            max_age: None,
            gc_interval: DEFAULT_GC_INTERVAL,
        }
    }
}

impl CacheConfig {
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn with_gc_interval(mut self, gc_interval: Duration) -> Self {
        self.gc_interval = gc_interval;
        self
    }

    /// Whether any eviction limit is set at all
    pub fn has_limits(&self) -> bool {
        self.max_entries.is_some() || self.max_age.is_some()
    }
}

pub(crate) type SharedConfig = Arc<RwLock<CacheConfig>>;

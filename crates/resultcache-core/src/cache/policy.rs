//! Cache eviction policy
//!
//! Pure decisions over entry timestamps and the configured limits. Nothing in
//! here touches the store.

use chrono::{DateTime, Utc};
use resultcache_storage::EntryMeta;
use std::fmt;
use std::time::Duration;

/// Why an entry was removed from the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Older than the configured maximum age
    Expired,
    /// Oldest entry while the cache held too many entries
    Capacity,
    /// Removed on request
    Invalidated,
}

impl EvictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionReason::Expired => "expired",
            EvictionReason::Capacity => "capacity",
            EvictionReason::Invalidated => "invalidated",
        }
    }
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True iff `max_age` is set and the entry is strictly older than it.
///
/// Timestamps in the future count as age zero.
pub fn is_expired_by_age(
    last_modified: DateTime<Utc>,
    max_age: Option<Duration>,
    now: DateTime<Utc>,
) -> bool {
    let Some(max_age) = max_age else {
        return false;
    };
    match (now - last_modified).to_std() {
        Ok(age) => age > max_age,
        Err(_) => false,
    }
}

/// True iff `max_entries` is set and `count` exceeds it
pub fn is_over_capacity(count: usize, max_entries: Option<usize>) -> bool {
    max_entries.is_some_and(|max| count > max)
}

/// The entry with the oldest last-modified time.
///
/// Ties go to the entry listed first.
pub fn select_eviction_candidate(entries: &[EntryMeta]) -> Option<&EntryMeta> {
    entries.iter().min_by_key(|entry| entry.last_modified)
}

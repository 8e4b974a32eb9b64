//! Cache management module

mod collector;
mod manager;
mod policy;

pub use collector::{spawn_collector_task, CollectorHandle, GarbageCollector, SweepReport};
pub use manager::ExpiringCache;
pub use policy::{is_expired_by_age, is_over_capacity, select_eviction_candidate, EvictionReason};

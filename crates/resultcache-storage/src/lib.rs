//! Result Cache Storage Layer
//!
//! This crate provides the key-addressable on-disk store that holds
//! cached result payloads, one file per key.

pub mod backend;
pub mod error;
pub mod local;

pub use backend::{validate_key, EntryMeta, EntryStore, Provider, MAX_KEY_LENGTH};
pub use error::StorageError;
pub use local::LocalStore;

//! Key/value persistence used by the outbox to survive restarts.
//!
//! The API mirrors browser localStorage: string keys, string values,
//! synchronous calls. Callers treat every error as non-fatal.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::StorageError;

/// Minimal string key/value store.
///
/// Stores must be Send + Sync so the outbox can share them behind an Arc.
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

//! Outbox persistence on top of a [`KeyValueStore`].
//!
//! Responsibilities:
//! - Write only live entries (never confirmed or failed ones) to the queue key.
//! - Downgrade `sending` to `pending` on both write and read.
//! - Validate persisted JSON entry by entry; anything malformed is dropped
//!   rather than trusted.
//! - Never fail the caller: storage errors are logged and swallowed, the
//!   in-memory queue stays authoritative.

use super::types::{DeadLetterEntry, EntryStatus, OutboxEntry};
use crate::config::OutboxConfig;
use crate::storage::KeyValueStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct OutboxPersistence {
    store: Arc<dyn KeyValueStore>,
    queue_key: String,
    dead_letter_key: String,
}

impl OutboxPersistence {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &OutboxConfig) -> Self {
        Self {
            store,
            queue_key: config.storage_key.clone(),
            dead_letter_key: config.dead_letter_storage_key.clone(),
        }
    }

    pub fn queue_key(&self) -> &str {
        &self.queue_key
    }

    pub fn save_queue(&self, entries: &[OutboxEntry]) {
        let live: Vec<OutboxEntry> = entries
            .iter()
            .filter(|entry| !entry.status().is_terminal())
            .cloned()
            .map(|mut entry| {
                entry.downgrade_in_flight();
                entry
            })
            .collect();
        self.write(&self.queue_key, &live);
    }

    pub fn load_queue(&self) -> Vec<OutboxEntry> {
        self.read::<OutboxEntry>(&self.queue_key)
            .into_iter()
            .filter_map(|mut entry| {
                if entry.client_id() != entry.response().id {
                    warn!(
                        "[Outbox] Dropping persisted entry {}: client id does not match response id",
                        entry.client_id()
                    );
                    return None;
                }
                if entry.status().is_terminal() {
                    debug!(
                        "[Outbox] Dropping persisted {} entry {}",
                        entry.status(),
                        entry.client_id()
                    );
                    return None;
                }
                entry.downgrade_in_flight();
                Some(entry)
            })
            .collect()
    }

    pub fn save_dead_letters(&self, entries: &[DeadLetterEntry]) {
        self.write(&self.dead_letter_key, entries);
    }

    pub fn load_dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.read::<DeadLetterEntry>(&self.dead_letter_key)
            .into_iter()
            .filter(|dead| {
                let entry = dead.entry();
                entry.status() == EntryStatus::Failed && entry.client_id() == entry.response().id
            })
            .collect()
    }

    fn write<T: Serialize>(&self, key: &str, entries: &[T]) {
        let json = match serde_json::to_string(entries) {
            Ok(json) => json,
            Err(e) => {
                warn!("[Outbox] Failed to serialize {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.store.set_item(key, &json) {
            warn!("[Outbox] Failed to persist {}: {}", key, e);
        }
    }

    /// Parse a JSON array element by element, skipping anything that does
    /// not have the expected shape. A missing or unreadable key is empty.
    fn read<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        let raw = match self.store.get_item(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("[Outbox] Failed to read {}: {}", key, e);
                return Vec::new();
            }
        };
        let values: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(values) => values,
            Err(e) => {
                warn!("[Outbox] Ignoring malformed data under {}: {}", key, e);
                return Vec::new();
            }
        };
        values
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<T>(value) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("[Outbox] Skipping malformed entry under {}: {}", key, e);
                    None
                }
            })
            .collect()
    }
}

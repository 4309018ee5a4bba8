use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Storage key for the live outbox queue.
pub const DEFAULT_OUTBOX_STORAGE_KEY: &str = "hemisphere:outbox:v1";
/// Storage key for dead-lettered entries.
pub const DEFAULT_DEAD_LETTER_STORAGE_KEY: &str = "hemisphere:outbox:dead:v1";

/// Upper bound on a single retry delay (24 hours).
pub const MAX_RETRY_DELAY_MS: u64 = 24 * 60 * 60 * 1000;
/// Upper bound accepted for `outbox.max_attempts`.
pub const MAX_ATTEMPTS_LIMIT: u32 = 100;
/// Upper bound accepted for `outbox.backoff_factor`.
pub const MAX_BACKOFF_FACTOR: f64 = 10.0;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub queue: QueueConfig,
    pub outbox: OutboxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of items after the cursor returned by the prefetch selector
    pub prefetch_window: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { prefetch_window: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutboxConfig {
    /// Failed attempts before an entry is dead-lettered
    pub max_attempts: u32,
    /// Backoff delay for the first retry, in milliseconds
    pub base_delay_ms: u64,
    /// Exponential growth factor between retries
    pub backoff_factor: f64,
    /// Symmetric jitter applied to each delay (0.2 = ±20%)
    pub jitter_ratio: f64,
    pub storage_key: String,
    pub dead_letter_storage_key: String,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            backoff_factor: 2.0,
            jitter_ratio: 0.2,
            storage_key: DEFAULT_OUTBOX_STORAGE_KEY.to_string(),
            dead_letter_storage_key: DEFAULT_DEAD_LETTER_STORAGE_KEY.to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_ATTEMPTS_LIMIT).contains(&self.outbox.max_attempts) {
            return Err(ConfigError::Invalid {
                field: "outbox.max_attempts",
                reason: format!(
                    "must be within [1, {}], got {}",
                    MAX_ATTEMPTS_LIMIT, self.outbox.max_attempts
                ),
            });
        }
        if self.outbox.base_delay_ms > MAX_RETRY_DELAY_MS {
            return Err(ConfigError::Invalid {
                field: "outbox.base_delay_ms",
                reason: format!(
                    "must be at most {} ms, got {}",
                    MAX_RETRY_DELAY_MS, self.outbox.base_delay_ms
                ),
            });
        }
        if !(1.0..=MAX_BACKOFF_FACTOR).contains(&self.outbox.backoff_factor) {
            return Err(ConfigError::Invalid {
                field: "outbox.backoff_factor",
                reason: format!(
                    "must be within [1.0, {}], got {}",
                    MAX_BACKOFF_FACTOR, self.outbox.backoff_factor
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.outbox.jitter_ratio) {
            return Err(ConfigError::Invalid {
                field: "outbox.jitter_ratio",
                reason: format!("must be within [0, 1], got {}", self.outbox.jitter_ratio),
            });
        }
        if self.outbox.storage_key == self.outbox.dead_letter_storage_key {
            return Err(ConfigError::Invalid {
                field: "outbox.dead_letter_storage_key",
                reason: "must differ from outbox.storage_key".to_string(),
            });
        }
        Ok(())
    }
}

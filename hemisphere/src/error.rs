//! Error types shared across the session runtime.
//!
//! None of these cross a UI boundary as a hard failure: delivery errors are
//! recorded on outbox entries, storage errors are logged and swallowed, and
//! config errors only surface at start-up.

use thiserror::Error;

/// Failure reported by a transport while delivering a response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Server rejected response ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Transport timed out after {0} ms")]
    Timeout(u64),
    #[error("Transport error: {0}")]
    Other(String),
}

/// Errors raised by outbox entry bookkeeping.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OutboxError {
    #[error("Illegal outbox transition for {client_id}: {from} -> {to}")]
    IllegalTransition {
        client_id: String,
        from: &'static str,
        to: &'static str,
    },
    #[error("No dead-letter entry for {0}")]
    DeadLetterNotFound(String),
}

/// A stage event the external reducer refused.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    #[error("Stage transition rejected: {0}")]
    Rejected(String),
}

/// Errors from the key/value persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serde(String),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Storage quota exceeded for key {0}")]
    QuotaExceeded(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serde(e.to_string())
    }
}

/// Errors loading runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {message}")]
    Read { path: String, message: String },
    #[error("Failed to parse config: {0}")]
    Parse(String),
    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

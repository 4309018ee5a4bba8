// Hemisphere Library
// Learning session runtime: presentation queue, response ledger and delivery outbox

pub mod clock;
pub mod config;
pub mod error;
pub mod outbox;
pub mod queue;
pub mod response;
pub mod session;
pub mod stage;
pub mod storage;

// Re-export main types for convenience
pub use config::{OutboxConfig, QueueConfig, RuntimeConfig};
pub use error::{ConfigError, OutboxError, StageError, StorageError, TransportError};
pub use outbox::{Outbox, OutboxEntry, OutboxStats};
pub use queue::{QueueItem, SessionQueue};
pub use response::{ResponseLedger, UserResponse};
pub use session::SessionRuntime;

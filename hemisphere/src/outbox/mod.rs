//! Durable, retrying delivery of learner responses.
//!
//! Write-then-deliver: a response is persisted locally before any attempt is
//! made to send it, and stays queued until the backend confirms it or it
//! exhausts its retries and is dead-lettered.

pub mod backoff;
pub mod engine;
pub mod network;
pub mod persistence;
pub mod scheduler;
pub mod transport;
pub mod types;

pub use backoff::{BackoffPolicy, FixedJitter, JitterSource, ThreadRngJitter};
pub use engine::{Outbox, OutboxBuilder};
pub use network::NetworkStatus;
pub use persistence::OutboxPersistence;
pub use scheduler::{ManualScheduler, TaskScheduler, TokioScheduler};
pub use transport::{transport_fn, FnTransport, ResponseTransport};
pub use types::{DeadLetterEntry, EntryStatus, OutboxEntry, OutboxStats};

//! Presentation queue for the active stage.
//!
//! Holds the ordered content items, the cursor into them, and seen/skip
//! bookkeeping. Pure in-memory; nothing here is persisted.

pub mod state;
pub mod types;

pub use state::SessionQueue;
pub use types::*;

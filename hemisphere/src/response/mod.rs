//! Response ledger: the in-flight answer and the finalized responses.

pub mod ledger;
pub mod types;

pub use ledger::ResponseLedger;
pub use types::*;

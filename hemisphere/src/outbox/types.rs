//! Outbox entry types and the entry status state machine.
//!
//! ```text
//! Pending ──► Sending ──► Confirmed
//!    ▲           │  ├───► Retrying ──► Sending ...
//!    └───────────┘  └───► Failed (dead letter)
//! ```
//!
//! `Sending -> Pending` only happens when an in-flight entry is written to
//! storage, since "in flight" cannot survive a restart.

use crate::error::OutboxError;
use crate::response::UserResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Sending,
    Retrying,
    Confirmed,
    Failed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Sending => "sending",
            EntryStatus::Retrying => "retrying",
            EntryStatus::Confirmed => "confirmed",
            EntryStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryStatus::Confirmed | EntryStatus::Failed)
    }

    pub fn can_transition_to(&self, next: EntryStatus) -> bool {
        use EntryStatus::*;
        matches!(
            (*self, next),
            (Pending, Sending)
                | (Retrying, Sending)
                | (Sending, Confirmed)
                | (Sending, Retrying)
                | (Sending, Failed)
                | (Sending, Pending)
        )
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A response waiting for (or in the middle of) delivery.
///
/// Fields are private: every status change goes through a checked transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    client_id: String,
    response: UserResponse,
    status: EntryStatus,
    enqueued_at: DateTime<Utc>,
    attempts: u32,
    retry_after: Option<DateTime<Utc>>,
    server_id: Option<String>,
    last_error: Option<String>,
}

impl OutboxEntry {
    /// Fresh pending entry. The client id is the response id.
    pub fn new(response: UserResponse, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            client_id: response.id.clone(),
            response,
            status: EntryStatus::Pending,
            enqueued_at,
            attempts: 0,
            retry_after: None,
            server_id: None,
            last_error: None,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn response(&self) -> &UserResponse {
        &self.response
    }

    pub fn status(&self) -> EntryStatus {
        self.status
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retry_after(&self) -> Option<DateTime<Utc>> {
        self.retry_after
    }

    pub fn server_id(&self) -> Option<&str> {
        self.server_id.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Pending, or retrying with an elapsed `retry_after`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            EntryStatus::Pending => true,
            EntryStatus::Retrying => self.retry_after.map_or(true, |at| at <= now),
            _ => false,
        }
    }

    fn transition(&mut self, next: EntryStatus) -> Result<(), OutboxError> {
        if !self.status.can_transition_to(next) {
            return Err(OutboxError::IllegalTransition {
                client_id: self.client_id.clone(),
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        self.status = next;
        Ok(())
    }

    pub(crate) fn begin_send(&mut self) -> Result<(), OutboxError> {
        self.transition(EntryStatus::Sending)
    }

    pub(crate) fn confirm(&mut self, server_id: String) -> Result<(), OutboxError> {
        self.transition(EntryStatus::Confirmed)?;
        self.server_id = Some(server_id);
        self.retry_after = None;
        Ok(())
    }

    /// Count a failed attempt. Returns the new attempt count.
    pub(crate) fn record_failure(&mut self, error: impl Into<String>) -> u32 {
        self.attempts += 1;
        self.last_error = Some(error.into());
        self.attempts
    }

    pub(crate) fn schedule_retry(&mut self, retry_after: DateTime<Utc>) -> Result<(), OutboxError> {
        self.transition(EntryStatus::Retrying)?;
        self.retry_after = Some(retry_after);
        Ok(())
    }

    pub(crate) fn mark_failed(&mut self) -> Result<(), OutboxError> {
        self.transition(EntryStatus::Failed)?;
        self.retry_after = None;
        Ok(())
    }

    /// Retire a live entry whose attempts are already spent.
    pub(crate) fn exhaust(&mut self) {
        if !self.status.is_terminal() {
            self.status = EntryStatus::Failed;
            self.retry_after = None;
        }
    }

    /// Return an in-flight entry to pending. Other statuses are left alone.
    pub(crate) fn downgrade_in_flight(&mut self) {
        if self.status == EntryStatus::Sending {
            self.status = EntryStatus::Pending;
            self.retry_after = None;
        }
    }
}

/// An entry that exhausted its attempts, frozen at `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEntry {
    #[serde(flatten)]
    entry: OutboxEntry,
    dead_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub(crate) fn new(entry: OutboxEntry, dead_at: DateTime<Utc>) -> Self {
        Self { entry, dead_at }
    }

    pub fn entry(&self) -> &OutboxEntry {
        &self.entry
    }

    pub fn client_id(&self) -> &str {
        self.entry.client_id()
    }

    pub fn dead_at(&self) -> DateTime<Utc> {
        self.dead_at
    }

    /// A brand-new pending entry for the same response: attempts, error and
    /// retry time cleared.
    pub(crate) fn revive(self, now: DateTime<Utc>) -> OutboxEntry {
        OutboxEntry::new(self.entry.response, now)
    }
}

/// Counters surfaced to UI indicators (e.g. a "syncing" badge).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxStats {
    pub pending: usize,
    pub dead_letters: usize,
    pub confirmed: usize,
}

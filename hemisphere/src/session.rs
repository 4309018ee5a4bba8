//! Session runtime context.
//!
//! One `SessionRuntime` is built at application start and handed to the UI
//! layer. It wires the queue, the response ledger, the stage driver and the
//! outbox together so a submit is one call: record the response, advance the
//! queue optimistically, hand a copy to the outbox.

use crate::clock::Clock;
use crate::config::RuntimeConfig;
use crate::error::StageError;
use crate::outbox::Outbox;
use crate::queue::{QueueItem, QueueProgress, SessionQueue};
use crate::response::{ActiveInteraction, ResponseLedger, ResponseSubmission, UserResponse};
use crate::stage::{StageDriver, StageReducer};
use std::sync::Arc;
use tracing::debug;

pub struct SessionRuntime<R: StageReducer> {
    queue: SessionQueue,
    ledger: ResponseLedger,
    stage: StageDriver<R>,
    outbox: Outbox,
}

impl<R: StageReducer> SessionRuntime<R> {
    pub fn new(
        config: &RuntimeConfig,
        clock: Arc<dyn Clock>,
        stage: StageDriver<R>,
        outbox: Outbox,
    ) -> Self {
        Self {
            queue: SessionQueue::new(config.queue.prefetch_window),
            ledger: ResponseLedger::new(clock),
            stage,
            outbox,
        }
    }

    pub fn queue(&self) -> &SessionQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut SessionQueue {
        &mut self.queue
    }

    pub fn ledger(&self) -> &ResponseLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut ResponseLedger {
        &mut self.ledger
    }

    pub fn stage(&self) -> &StageDriver<R> {
        &self.stage
    }

    pub fn stage_mut(&mut self) -> &mut StageDriver<R> {
        &mut self.stage
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn start_stage<I, T>(&mut self, ids: I, stage: &str)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.ledger.cancel_interaction();
        self.queue.init_queue(ids, stage);
    }

    /// Append the next stage's items; playback resumes on them if the
    /// current stage was exhausted.
    pub fn continue_stage<I, T>(&mut self, ids: I, stage: &str) -> usize
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.queue.append_items(ids, stage)
    }

    /// Open an interaction on the item under the cursor.
    pub fn begin_current(&mut self) -> Option<&ActiveInteraction> {
        let item = self.queue.current_item()?;
        let (item_id, stage) = (item.id.clone(), item.stage.clone());
        Some(self.ledger.begin_interaction(&item_id, &stage))
    }

    /// Record the answer, advance the queue, and queue delivery.
    ///
    /// Returns `None` (and does nothing else) when the ledger ignores the
    /// submit, e.g. on a double submit.
    pub fn submit_current(&mut self, submission: ResponseSubmission) -> Option<UserResponse> {
        let response = self.ledger.submit_response(submission)?;
        let on_cursor = self
            .queue
            .current_item()
            .map_or(false, |item| item.id == response.item_id);
        if on_cursor {
            self.queue.advance();
        } else {
            debug!(
                "[Session] Response for {} is not on the cursor; queue not advanced",
                response.item_id
            );
        }
        self.outbox.enqueue_response(response.clone());
        Some(response)
    }

    pub fn skip_current(&mut self) -> bool {
        self.ledger.cancel_interaction();
        self.queue.skip()
    }

    pub fn send_event(&mut self, event: &R::Event) -> Result<&R::State, StageError> {
        self.stage.send_event(event)
    }

    /// Clear queue and ledger. Queued deliveries are left to the outbox.
    pub fn end_session(&mut self) {
        self.queue.clear_queue();
        self.ledger.clear_responses();
    }

    // Read API

    pub fn current_item(&self) -> Option<&QueueItem> {
        self.queue.current_item()
    }

    pub fn queue_progress(&self) -> QueueProgress {
        self.queue.queue_progress()
    }

    pub fn accuracy(&self) -> Option<f64> {
        self.ledger.accuracy()
    }

    pub fn pending_count(&self) -> usize {
        self.outbox.pending_count()
    }

    pub fn has_dead_letters(&self) -> bool {
        self.outbox.has_dead_letters()
    }

    pub fn server_id(&self, client_id: &str) -> Option<String> {
        self.outbox.server_id(client_id)
    }
}

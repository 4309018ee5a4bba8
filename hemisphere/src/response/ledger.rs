use super::types::{ActiveInteraction, ResponseQuality, ResponseSubmission, UserResponse};
use crate::clock::{Clock, SystemClock};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Records one `UserResponse` per answered item and tracks the active interaction.
///
/// Responses are keyed by item id and kept in submission order for replay.
pub struct ResponseLedger {
    responses: IndexMap<String, UserResponse>,
    active: Option<ActiveInteraction>,
    clock: Arc<dyn Clock>,
}

impl ResponseLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            responses: IndexMap::new(),
            active: None,
            clock,
        }
    }

    pub fn active_interaction(&self) -> Option<&ActiveInteraction> {
        self.active.as_ref()
    }

    /// Open an interaction for `item_id`, replacing any existing one.
    pub fn begin_interaction(&mut self, item_id: &str, stage: &str) -> &ActiveInteraction {
        if let Some(previous) = &self.active {
            debug!(
                "[Ledger] Discarding unfinished interaction for {}",
                previous.item_id
            );
        }
        self.active.insert(ActiveInteraction {
            item_id: item_id.to_string(),
            stage: stage.to_string(),
            started_at: self.clock.now(),
            draft_value: None,
            showing_result: false,
        })
    }

    pub fn update_draft(&mut self, value: Value) -> bool {
        match self.active.as_mut() {
            Some(active) => {
                active.draft_value = Some(value);
                true
            }
            None => false,
        }
    }

    pub fn reveal_answer(&mut self) -> bool {
        match self.active.as_mut() {
            Some(active) => {
                active.showing_result = true;
                true
            }
            None => false,
        }
    }

    pub fn cancel_interaction(&mut self) -> bool {
        self.active.take().is_some()
    }

    /// Finalize the active interaction into a `UserResponse`.
    ///
    /// Consumes the active interaction. Returns `None` when there is none,
    /// so a double submit records nothing.
    pub fn submit_response(&mut self, submission: ResponseSubmission) -> Option<UserResponse> {
        let Some(active) = self.active.take() else {
            debug!("[Ledger] Ignoring submit without an open interaction");
            return None;
        };
        let submitted_at = self.clock.now();

        let response = UserResponse {
            id: Uuid::new_v4().to_string(),
            item_id: active.item_id,
            stage: active.stage,
            started_at: active.started_at,
            submitted_at,
            latency_ms: (submitted_at - active.started_at).num_milliseconds(),
            modality: submission.modality,
            value: submission
                .value
                .or(active.draft_value)
                .unwrap_or(Value::Null),
            is_correct: submission.is_correct,
            quality: None,
            self_confidence: None,
        };

        // Re-answering replaces the earlier response and moves it to the end.
        self.responses.shift_remove(&response.item_id);
        self.responses
            .insert(response.item_id.clone(), response.clone());
        debug!(
            "[Ledger] Recorded response {} for item {} ({} ms)",
            response.id, response.item_id, response.latency_ms
        );
        Some(response)
    }

    pub fn rate_response(&mut self, item_id: &str, quality: ResponseQuality) -> bool {
        match self.responses.get_mut(item_id) {
            Some(response) => {
                response.quality = Some(quality);
                true
            }
            None => false,
        }
    }

    /// Attach self-reported confidence, clamped to [0, 1]. Non-finite input is rejected.
    pub fn set_confidence(&mut self, item_id: &str, confidence: f64) -> bool {
        if !confidence.is_finite() {
            return false;
        }
        match self.responses.get_mut(item_id) {
            Some(response) => {
                response.self_confidence = Some(confidence.clamp(0.0, 1.0));
                true
            }
            None => false,
        }
    }

    pub fn clear_responses(&mut self) {
        self.responses.clear();
        self.active = None;
    }

    pub fn response_for(&self, item_id: &str) -> Option<&UserResponse> {
        self.responses.get(item_id)
    }

    /// Responses in submission order.
    pub fn responses_in_order(&self) -> impl Iterator<Item = &UserResponse> {
        self.responses.values()
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    /// Share of correct answers among auto-graded responses.
    /// Ungraded responses are left out of the denominator.
    pub fn accuracy(&self) -> Option<f64> {
        let graded: Vec<bool> = self
            .responses
            .values()
            .filter_map(|response| response.is_correct)
            .collect();
        if graded.is_empty() {
            return None;
        }
        let correct = graded.iter().filter(|c| **c).count();
        Some(correct as f64 / graded.len() as f64)
    }

    pub fn mean_latency_ms(&self) -> Option<f64> {
        if self.responses.is_empty() {
            return None;
        }
        let total: i64 = self.responses.values().map(|r| r.latency_ms).sum();
        Some(total as f64 / self.responses.len() as f64)
    }
}

impl Default for ResponseLedger {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::response::types::Modality;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn ledger_with_clock() -> (ResponseLedger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (ResponseLedger::new(clock.clone()), clock)
    }

    fn answer(ledger: &mut ResponseLedger, item: &str, is_correct: Option<bool>) {
        ledger.begin_interaction(item, "analysis");
        let mut submission = ResponseSubmission::new(Modality::Tap);
        submission.is_correct = is_correct;
        ledger.submit_response(submission).unwrap();
    }

    #[test]
    fn test_submit_computes_latency_and_uses_draft() {
        let (mut ledger, clock) = ledger_with_clock();
        ledger.begin_interaction("a", "analysis");
        assert!(ledger.update_draft(json!("C major")));
        clock.advance(Duration::milliseconds(1234));

        let response = ledger
            .submit_response(ResponseSubmission::new(Modality::Typed).graded(true))
            .unwrap();
        assert_eq!(response.latency_ms, 1234);
        assert_eq!(response.value, json!("C major"));
        assert_eq!(response.item_id, "a");
        assert_eq!(response.stage, "analysis");
        assert!(ledger.active_interaction().is_none());
        assert_eq!(ledger.response_for("a"), Some(&response));
    }

    #[test]
    fn test_double_submit_is_noop() {
        let (mut ledger, _) = ledger_with_clock();
        ledger.begin_interaction("a", "analysis");
        assert!(ledger
            .submit_response(ResponseSubmission::new(Modality::Tap))
            .is_some());
        assert!(ledger
            .submit_response(ResponseSubmission::new(Modality::Tap))
            .is_none());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_submit_consumes_interaction() {
        let (mut ledger, _) = ledger_with_clock();
        ledger.begin_interaction("a", "analysis");
        ledger.submit_response(ResponseSubmission::new(Modality::Tap));
        assert!(ledger.active_interaction().is_none());
        assert!(!ledger.update_draft(json!("late edit")));
        assert!(!ledger.reveal_answer());
        assert_eq!(ledger.response_for("a").unwrap().value, serde_json::Value::Null);
    }

    #[test]
    fn test_submit_without_interaction_returns_none() {
        let (mut ledger, _) = ledger_with_clock();
        assert!(ledger
            .submit_response(ResponseSubmission::new(Modality::Tap))
            .is_none());
        assert!(!ledger.update_draft(json!(1)));
        assert!(!ledger.reveal_answer());
        assert!(!ledger.cancel_interaction());
    }

    #[test]
    fn test_accuracy_ignores_ungraded() {
        let (mut ledger, _) = ledger_with_clock();
        assert_eq!(ledger.accuracy(), None);
        answer(&mut ledger, "a", Some(true));
        answer(&mut ledger, "b", Some(false));
        answer(&mut ledger, "c", None);
        assert_eq!(ledger.accuracy(), Some(0.5));
    }

    #[test]
    fn test_annotations_only_touch_existing_responses() {
        let (mut ledger, _) = ledger_with_clock();
        answer(&mut ledger, "a", Some(true));

        assert!(ledger.rate_response("a", ResponseQuality::Good));
        assert!(!ledger.rate_response("missing", ResponseQuality::Good));
        assert!(ledger.set_confidence("a", 1.7));
        assert!(!ledger.set_confidence("a", f64::NAN));
        assert!(!ledger.set_confidence("missing", 0.5));

        let response = ledger.response_for("a").unwrap();
        assert_eq!(response.quality, Some(ResponseQuality::Good));
        assert_eq!(response.self_confidence, Some(1.0));

        ledger.set_confidence("a", -3.0);
        assert_eq!(ledger.response_for("a").unwrap().self_confidence, Some(0.0));
    }

    #[test]
    fn test_reanswer_replaces_and_reorders() {
        let (mut ledger, _) = ledger_with_clock();
        answer(&mut ledger, "a", Some(false));
        answer(&mut ledger, "b", Some(true));
        answer(&mut ledger, "a", Some(true));

        let order: Vec<&str> = ledger
            .responses_in_order()
            .map(|r| r.item_id.as_str())
            .collect();
        assert_eq!(order, vec!["b", "a"]);
        assert_eq!(ledger.accuracy(), Some(1.0));
    }

    #[test]
    fn test_begin_replaces_and_cancel_clears() {
        let (mut ledger, _) = ledger_with_clock();
        ledger.begin_interaction("a", "analysis");
        ledger.update_draft(json!("draft"));
        ledger.begin_interaction("b", "analysis");
        let active = ledger.active_interaction().unwrap();
        assert_eq!(active.item_id, "b");
        assert_eq!(active.draft_value, None);

        assert!(ledger.reveal_answer());
        assert!(ledger.active_interaction().unwrap().showing_result);
        assert!(ledger.cancel_interaction());
        assert!(ledger.active_interaction().is_none());
    }

    #[test]
    fn test_mean_latency_and_clear() {
        let (mut ledger, clock) = ledger_with_clock();
        ledger.begin_interaction("a", "analysis");
        clock.advance(Duration::milliseconds(100));
        ledger.submit_response(ResponseSubmission::new(Modality::Tap));
        ledger.begin_interaction("b", "analysis");
        clock.advance(Duration::milliseconds(300));
        ledger.submit_response(ResponseSubmission::new(Modality::Tap));
        assert_eq!(ledger.mean_latency_ms(), Some(200.0));

        ledger.clear_responses();
        assert!(ledger.is_empty());
        assert_eq!(ledger.mean_latency_ms(), None);
    }
}

use crate::queue::StageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How the learner produced the answer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Tap,
    Typed,
    Spoken,
    Drawn,
}

/// Post-hoc recall rating attached by the learner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResponseQuality {
    Again,
    Hard,
    Good,
    Easy,
}

/// The single answer-in-progress for the item on screen.
///
/// Submitting consumes the interaction, so one that exists is never
/// submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveInteraction {
    pub item_id: String,
    pub stage: StageId,
    pub started_at: DateTime<Utc>,
    pub draft_value: Option<Value>,
    pub showing_result: bool,
}

/// A finalized answer. Immutable apart from `quality` and `self_confidence`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub item_id: String,
    pub stage: StageId,
    pub started_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
    pub latency_ms: i64,
    pub modality: Modality,
    pub value: Value,
    /// `None` for free-recall or subjective items that are never auto-graded
    pub is_correct: Option<bool>,
    #[serde(default)]
    pub quality: Option<ResponseQuality>,
    #[serde(default)]
    pub self_confidence: Option<f64>,
}

/// What the caller hands to `submit_response`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSubmission {
    pub modality: Modality,
    /// Final value; falls back to the interaction's draft when `None`
    pub value: Option<Value>,
    pub is_correct: Option<bool>,
}

impl ResponseSubmission {
    pub fn new(modality: Modality) -> Self {
        Self {
            modality,
            value: None,
            is_correct: None,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn graded(mut self, is_correct: bool) -> Self {
        self.is_correct = Some(is_correct);
        self
    }
}

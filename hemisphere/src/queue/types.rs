use serde::{Deserialize, Serialize};

/// Identifier for a session stage (e.g. "analysis", "practice").
pub type StageId = String;

/// A content item scheduled for presentation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    pub stage: StageId,
    /// Unique and monotonic within `stage`.
    pub position: u32,
    pub seen: bool,
    pub skip_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl QueueItem {
    pub fn new(id: impl Into<String>, stage: impl Into<StageId>, position: u32) -> Self {
        Self {
            id: id.into(),
            stage: stage.into(),
            position,
            seen: false,
            skip_count: 0,
            activity_type: None,
            label: None,
        }
    }
}

/// Presentation metadata patch applied by `set_item_meta`.
/// `None` fields leave the existing value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemMeta {
    pub activity_type: Option<String>,
    pub label: Option<String>,
}

impl ItemMeta {
    pub fn with_activity_type(mut self, activity_type: impl Into<String>) -> Self {
        self.activity_type = Some(activity_type.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Aggregated view of queue progress, useful for UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueProgress {
    /// 1-based position of the cursor, 0 when the queue is empty
    pub current: usize,
    pub total: usize,
    pub seen: usize,
    pub skipped: usize,
    pub remaining: usize,
    pub exhausted: bool,
}

impl QueueProgress {
    /// Fraction of items seen, in [0, 1].
    pub fn fraction_seen(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.seen as f64 / self.total as f64
        }
    }
}

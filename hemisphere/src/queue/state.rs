use super::types::{ItemMeta, QueueItem, QueueProgress};
use tracing::debug;

/// Ordered presentation queue with a cursor.
///
/// Invariants:
/// - `current_index` is `Some(i)` with `i < items.len()` whenever the queue
///   is non-empty, and `None` only when it is empty.
/// - Only forward progression (`advance`, `skip`) touches seen/skip counters.
#[derive(Debug, Clone)]
pub struct SessionQueue {
    items: Vec<QueueItem>,
    current_index: Option<usize>,
    stage_queue_exhausted: bool,
    prefetch_window: usize,
}

impl SessionQueue {
    pub fn new(prefetch_window: usize) -> Self {
        Self {
            items: Vec::new(),
            current_index: None,
            stage_queue_exhausted: false,
            prefetch_window,
        }
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn is_exhausted(&self) -> bool {
        self.stage_queue_exhausted
    }

    pub fn prefetch_window(&self) -> usize {
        self.prefetch_window
    }

    /// Replace the queue with `ids` for `stage`, cursor on the first item.
    pub fn init_queue<I, T>(&mut self, ids: I, stage: &str)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.items = ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| QueueItem::new(id, stage, i as u32))
            .collect();
        self.current_index = if self.items.is_empty() { None } else { Some(0) };
        self.stage_queue_exhausted = false;
        debug!(
            "[Queue] Initialized stage '{}' with {} items",
            stage,
            self.items.len()
        );
    }

    /// Append items for `stage`. Returns how many were added.
    ///
    /// When the queue was exhausted (or empty) the cursor moves onto the first
    /// appended item, which is how playback resumes across stages.
    pub fn append_items<I, T>(&mut self, ids: I, stage: &str) -> usize
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let first_new = self.items.len();
        let mut next_position = self
            .items
            .iter()
            .filter(|item| item.stage == stage)
            .map(|item| item.position + 1)
            .max()
            .unwrap_or(0);

        for id in ids {
            self.items.push(QueueItem::new(id, stage, next_position));
            next_position += 1;
        }

        let added = self.items.len() - first_new;
        if added > 0 && (self.stage_queue_exhausted || self.current_index.is_none()) {
            self.current_index = Some(first_new);
            self.stage_queue_exhausted = false;
            debug!("[Queue] Resuming at appended item {}", first_new);
        }
        added
    }

    /// Mark the current item seen and move forward.
    pub fn advance(&mut self) -> bool {
        self.step_forward(false)
    }

    /// Mark the current item seen, count a skip, and move forward.
    pub fn skip(&mut self) -> bool {
        self.step_forward(true)
    }

    fn step_forward(&mut self, skipped: bool) -> bool {
        let Some(index) = self.current_index else {
            return false;
        };
        let item = &mut self.items[index];
        item.seen = true;
        if skipped {
            item.skip_count += 1;
        }

        if index + 1 < self.items.len() {
            self.current_index = Some(index + 1);
            true
        } else {
            if !self.stage_queue_exhausted {
                debug!("[Queue] Stage queue exhausted at index {}", index);
            }
            self.stage_queue_exhausted = true;
            false
        }
    }

    /// Move the cursor back one item. Counters are untouched.
    pub fn go_back(&mut self) -> bool {
        match self.current_index {
            Some(index) if index > 0 => {
                self.current_index = Some(index - 1);
                self.stage_queue_exhausted = false;
                true
            }
            _ => false,
        }
    }

    /// Move the cursor onto `item_id`. Counters are untouched.
    pub fn jump_to(&mut self, item_id: &str) -> bool {
        match self.items.iter().position(|item| item.id == item_id) {
            Some(index) => {
                self.current_index = Some(index);
                self.stage_queue_exhausted = false;
                true
            }
            None => false,
        }
    }

    pub fn mark_seen(&mut self, item_id: &str) -> bool {
        match self.items.iter_mut().find(|item| item.id == item_id) {
            Some(item) => {
                item.seen = true;
                true
            }
            None => false,
        }
    }

    pub fn set_item_meta(&mut self, item_id: &str, meta: ItemMeta) -> bool {
        let Some(item) = self.items.iter_mut().find(|item| item.id == item_id) else {
            return false;
        };
        if let Some(activity_type) = meta.activity_type {
            item.activity_type = Some(activity_type);
        }
        if let Some(label) = meta.label {
            item.label = Some(label);
        }
        true
    }

    pub fn clear_queue(&mut self) {
        self.items.clear();
        self.current_index = None;
        self.stage_queue_exhausted = false;
    }

    // Selectors

    pub fn current_item(&self) -> Option<&QueueItem> {
        self.current_index.and_then(|i| self.items.get(i))
    }

    /// Up to `prefetch_window` items strictly after the cursor.
    pub fn prefetch_items(&self) -> &[QueueItem] {
        let Some(index) = self.current_index else {
            return &[];
        };
        let start = (index + 1).min(self.items.len());
        let end = (start + self.prefetch_window).min(self.items.len());
        &self.items[start..end]
    }

    pub fn queue_progress(&self) -> QueueProgress {
        let seen = self.items.iter().filter(|item| item.seen).count();
        QueueProgress {
            current: self.current_index.map(|i| i + 1).unwrap_or(0),
            total: self.items.len(),
            seen,
            skipped: self.items.iter().filter(|item| item.skip_count > 0).count(),
            remaining: self.items.len() - seen,
            exhausted: self.stage_queue_exhausted,
        }
    }

    pub fn items_by_stage(&self, stage: &str) -> Vec<&QueueItem> {
        self.items.iter().filter(|item| item.stage == stage).collect()
    }
}

impl Default for SessionQueue {
    fn default() -> Self {
        Self::new(3)
    }
}

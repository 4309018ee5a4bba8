use std::sync::atomic::{AtomicBool, Ordering};

/// Connectivity flag consulted before each delivery attempt.
///
/// Offline is a precondition not yet met, not a failure: the outbox leaves
/// entries untouched while this reports offline.
#[derive(Debug)]
pub struct NetworkStatus {
    online: AtomicBool,
}

impl NetworkStatus {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Returns the previous value.
    pub fn set_online(&self, online: bool) -> bool {
        self.online.swap(online, Ordering::AcqRel)
    }
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self::new(true)
    }
}

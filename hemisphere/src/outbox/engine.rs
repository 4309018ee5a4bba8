//! The delivery engine.
//!
//! Accepts confirmed responses, persists them, and drains them through the
//! configured transport one at a time. Failures back off exponentially;
//! entries that exhaust their attempts move to the dead-letter queue until
//! someone revives or dismisses them.
//!
//! Locking: `state` is a std mutex that is never held across an `.await`.
//! The `is_flushing` flag is the single-flight guard ensuring at most one
//! transport call is in progress.

use super::backoff::{BackoffPolicy, JitterSource, ThreadRngJitter};
use super::network::NetworkStatus;
use super::persistence::OutboxPersistence;
use super::scheduler::{TaskScheduler, TokioScheduler};
use super::transport::ResponseTransport;
use super::types::{DeadLetterEntry, EntryStatus, OutboxEntry, OutboxStats};
use crate::clock::{Clock, SystemClock};
use crate::config::OutboxConfig;
use crate::error::{OutboxError, TransportError};
use crate::response::UserResponse;
use crate::storage::KeyValueStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct OutboxState {
    /// Live entries in enqueue order
    queue: Vec<OutboxEntry>,
    dead_letters: Vec<DeadLetterEntry>,
    /// client id -> server id
    confirmed_ids: HashMap<String, String>,
}

impl OutboxState {
    fn knows(&self, client_id: &str) -> bool {
        self.confirmed_ids.contains_key(client_id)
            || self.queue.iter().any(|e| e.client_id() == client_id)
            || self.dead_letters.iter().any(|d| d.client_id() == client_id)
    }

    /// Oldest eligible entry by enqueue time, ties broken by queue order.
    fn next_eligible(&self, now: chrono::DateTime<chrono::Utc>) -> Option<usize> {
        self.queue
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_eligible(now))
            .min_by_key(|(index, entry)| (entry.enqueued_at(), *index))
            .map(|(index, _)| index)
    }

    fn position(&self, client_id: &str) -> Option<usize> {
        self.queue.iter().position(|e| e.client_id() == client_id)
    }

    fn stats(&self) -> OutboxStats {
        OutboxStats {
            pending: self.queue.len(),
            dead_letters: self.dead_letters.len(),
            confirmed: self.confirmed_ids.len(),
        }
    }
}

struct OutboxInner {
    state: Mutex<OutboxState>,
    transport: RwLock<Option<Arc<dyn ResponseTransport>>>,
    is_flushing: AtomicBool,
    persistence: OutboxPersistence,
    backoff: BackoffPolicy,
    max_attempts: u32,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn TaskScheduler>,
    jitter: Arc<dyn JitterSource>,
    network: Arc<NetworkStatus>,
    stats_tx: watch::Sender<OutboxStats>,
}

/// Releases the single-flight flag when a flush ends, however it ends.
struct FlushGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FlushGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Builder for [`Outbox`]. Every seam defaults to its production implementation.
pub struct OutboxBuilder {
    config: OutboxConfig,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn TaskScheduler>,
    jitter: Arc<dyn JitterSource>,
    network: Arc<NetworkStatus>,
}

impl OutboxBuilder {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn TaskScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_network(mut self, network: Arc<NetworkStatus>) -> Self {
        self.network = network;
        self
    }

    pub fn build(self) -> Outbox {
        let (stats_tx, _) = watch::channel(OutboxStats::default());
        Outbox {
            inner: Arc::new(OutboxInner {
                state: Mutex::new(OutboxState::default()),
                transport: RwLock::new(None),
                is_flushing: AtomicBool::new(false),
                persistence: OutboxPersistence::new(self.store, &self.config),
                backoff: BackoffPolicy::from_config(&self.config),
                max_attempts: self.config.max_attempts.max(1),
                clock: self.clock,
                scheduler: self.scheduler,
                jitter: self.jitter,
                network: self.network,
                stats_tx,
            }),
        }
    }
}

/// Handle to the shared outbox. Cloning is cheap and every clone sees the
/// same queue.
#[derive(Clone)]
pub struct Outbox {
    inner: Arc<OutboxInner>,
}

impl Outbox {
    pub fn builder(config: &OutboxConfig, store: Arc<dyn KeyValueStore>) -> OutboxBuilder {
        OutboxBuilder {
            config: config.clone(),
            store,
            clock: Arc::new(SystemClock),
            scheduler: Arc::new(TokioScheduler),
            jitter: Arc::new(ThreadRngJitter),
            network: Arc::new(NetworkStatus::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, OutboxState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn transport(&self) -> Option<Arc<dyn ResponseTransport>> {
        self.inner
            .transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Write both queues to storage and publish fresh stats.
    fn commit(&self, state: &OutboxState) {
        self.inner.persistence.save_queue(&state.queue);
        self.inner.persistence.save_dead_letters(&state.dead_letters);
        self.inner.stats_tx.send_replace(state.stats());
    }

    fn schedule_flush(&self, delay: Duration) {
        let outbox = self.clone();
        self.inner
            .scheduler
            .schedule(delay, Box::pin(async move { outbox.flush().await }));
    }

    /// Flush now, and arm a timer for the earliest entry still backing off.
    /// Retry timers do not survive a restart, so this runs whenever queued
    /// work may have no timer behind it.
    fn kick(&self) {
        let now = self.inner.clock.now();
        let next_retry = self
            .state()
            .queue
            .iter()
            .filter_map(|entry| entry.retry_after())
            .filter(|at| *at > now)
            .min();
        self.schedule_flush(Duration::ZERO);
        if let Some(at) = next_retry {
            let delay = (at - now).to_std().unwrap_or_default();
            debug!("[Outbox] Next retry due in {:?}", delay);
            self.schedule_flush(delay);
        }
    }

    /// Install the transport and kick off delivery of anything queued.
    pub fn configure(&self, transport: Arc<dyn ResponseTransport>) {
        *self
            .inner
            .transport
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(transport);
        info!("[Outbox] Transport configured");
        self.kick();
    }

    pub fn is_configured(&self) -> bool {
        self.transport().is_some()
    }

    /// Queue a response for delivery. Fire-and-forget: returns once the entry
    /// is stored, delivery happens on a scheduled flush.
    ///
    /// Returns `false` when the response is already known to the outbox.
    pub fn enqueue_response(&self, response: UserResponse) -> bool {
        let now = self.inner.clock.now();
        {
            let mut state = self.state();
            if state.knows(&response.id) {
                debug!("[Outbox] Ignoring duplicate enqueue of {}", response.id);
                return false;
            }
            debug!(
                "[Outbox] Enqueued {} for item {}",
                response.id, response.item_id
            );
            state.queue.push(OutboxEntry::new(response, now));
            self.commit(&state);
        }
        if !self.is_configured() {
            debug!("[Outbox] No transport yet; entry will wait for configure()");
        }
        self.schedule_flush(Duration::ZERO);
        true
    }

    /// Deliver eligible entries one at a time until none remain.
    ///
    /// A no-op when another flush is already running: that flush re-scans the
    /// queue after each delivery and, after releasing the flag, once more
    /// before returning, so work enqueued at any point is picked up.
    pub async fn flush(&self) {
        loop {
            let Some(guard) = FlushGuard::try_acquire(&self.inner.is_flushing) else {
                debug!("[Outbox] Flush already in progress");
                return;
            };
            while self.flush_one().await {}
            drop(guard);

            // A flush triggered between the last scan and the release above
            // saw the flag still set and returned without sending.
            if !self.has_deliverable_work() {
                return;
            }
        }
    }

    fn has_deliverable_work(&self) -> bool {
        self.is_configured()
            && self.inner.network.is_online()
            && self
                .state()
                .next_eligible(self.inner.clock.now())
                .is_some()
    }

    /// One delivery attempt. Returns whether the queue should be re-scanned.
    async fn flush_one(&self) -> bool {
        let (client_id, response, transport) = {
            let mut state = self.state();
            let Some(index) = state.next_eligible(self.inner.clock.now()) else {
                return false;
            };
            let Some(transport) = self.transport() else {
                return false;
            };
            if !self.inner.network.is_online() {
                debug!(
                    "[Outbox] Offline; leaving {} queued",
                    state.queue[index].client_id()
                );
                return false;
            }
            let entry = &mut state.queue[index];
            if let Err(e) = entry.begin_send() {
                warn!("[Outbox] {}", e);
                return false;
            }
            let selected = (
                entry.client_id().to_string(),
                entry.response().clone(),
                transport,
            );
            self.commit(&state);
            selected
        };

        debug!("[Outbox] Sending {}", client_id);
        match transport.submit(&response).await {
            Ok(server_id) => self.handle_confirmed(&client_id, server_id),
            Err(error) => self.handle_failure(&client_id, error),
        }
        true
    }

    fn handle_confirmed(&self, client_id: &str, server_id: String) {
        let mut state = self.state();
        if let Some(index) = state.position(client_id) {
            if let Err(e) = state.queue[index].confirm(server_id.clone()) {
                warn!("[Outbox] {}", e);
                return;
            }
        }
        info!("[Outbox] Delivered {} as {}", client_id, server_id);
        state.confirmed_ids.insert(client_id.to_string(), server_id);
        state
            .queue
            .retain(|entry| entry.status() != EntryStatus::Confirmed);
        self.commit(&state);
    }

    fn handle_failure(&self, client_id: &str, error: TransportError) {
        let now = self.inner.clock.now();
        let retry_delay = {
            let mut state = self.state();
            let Some(index) = state.position(client_id) else {
                return;
            };
            let attempts = state.queue[index].record_failure(error.to_string());

            let delay = self
                .inner
                .backoff
                .delay_for(attempts, self.inner.jitter.as_ref());
            let retry_after = chrono::Duration::from_std(delay)
                .ok()
                .and_then(|d| now.checked_add_signed(d));

            let retry_after = match retry_after {
                Some(at) if attempts < self.inner.max_attempts => at,
                _ => {
                    if let Err(e) = state.queue[index].mark_failed() {
                        warn!("[Outbox] {}", e);
                        return;
                    }
                    let entry = state.queue.remove(index);
                    warn!(
                        "[Outbox] Giving up on {} after {} attempts: {}",
                        client_id, attempts, error
                    );
                    state.dead_letters.push(DeadLetterEntry::new(entry, now));
                    self.commit(&state);
                    return;
                }
            };

            if let Err(e) = state.queue[index].schedule_retry(retry_after) {
                warn!("[Outbox] {}", e);
                return;
            }
            info!(
                "[Outbox] Attempt {} for {} failed ({}); retrying in {:?}",
                attempts, client_id, error, delay
            );
            self.commit(&state);
            delay
        };
        self.schedule_flush(retry_delay);
    }

    /// Move a dead-lettered entry back into the live queue as a fresh pending
    /// entry and trigger a flush.
    pub fn revive_dead_letter(&self, client_id: &str) -> Result<(), OutboxError> {
        let now = self.inner.clock.now();
        {
            let mut state = self.state();
            let index = state
                .dead_letters
                .iter()
                .position(|dead| dead.client_id() == client_id)
                .ok_or_else(|| OutboxError::DeadLetterNotFound(client_id.to_string()))?;
            let dead = state.dead_letters.remove(index);
            state.queue.push(dead.revive(now));
            info!("[Outbox] Revived {}", client_id);
            self.commit(&state);
        }
        self.schedule_flush(Duration::ZERO);
        Ok(())
    }

    /// Permanently discard a dead-lettered entry. The response stays in the
    /// ledger but is never retried.
    pub fn dismiss_dead_letter(&self, client_id: &str) -> bool {
        let mut state = self.state();
        let before = state.dead_letters.len();
        state.dead_letters.retain(|dead| dead.client_id() != client_id);
        let removed = state.dead_letters.len() != before;
        if removed {
            info!("[Outbox] Dismissed {}", client_id);
            self.commit(&state);
        }
        removed
    }

    /// Merge persisted entries that are not already in memory. Flushes when
    /// a transport is configured. Returns how many entries were merged.
    ///
    /// Entries that already used up `max_attempts` (persisted under a higher
    /// limit) go straight to the dead-letter queue.
    pub fn rehydrate(&self) -> usize {
        let now = self.inner.clock.now();
        let persisted = self.inner.persistence.load_queue();
        let persisted_dead = self.inner.persistence.load_dead_letters();
        let merged = {
            let mut state = self.state();
            let mut merged = 0;
            for mut entry in persisted {
                if state.knows(entry.client_id()) {
                    continue;
                }
                merged += 1;
                if entry.attempts() >= self.inner.max_attempts {
                    warn!(
                        "[Outbox] Persisted {} already used {} attempts; dead-lettering",
                        entry.client_id(),
                        entry.attempts()
                    );
                    entry.exhaust();
                    state.dead_letters.push(DeadLetterEntry::new(entry, now));
                } else {
                    state.queue.push(entry);
                }
            }
            for dead in persisted_dead {
                if !state.knows(dead.client_id()) {
                    state.dead_letters.push(dead);
                    merged += 1;
                }
            }
            self.commit(&state);
            merged
        };
        info!("[Outbox] Rehydrated {} entries", merged);
        if self.is_configured() {
            self.kick();
        }
        merged
    }

    /// Connectivity signal. Coming online triggers a flush.
    pub fn set_online(&self, online: bool) {
        let was_online = self.inner.network.set_online(online);
        if online {
            if !was_online {
                info!("[Outbox] Back online");
            }
            self.schedule_flush(Duration::ZERO);
        } else if was_online {
            info!("[Outbox] Offline; deliveries paused");
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.network.is_online()
    }

    // Read API

    pub fn pending_count(&self) -> usize {
        self.state().queue.len()
    }

    pub fn has_dead_letters(&self) -> bool {
        !self.state().dead_letters.is_empty()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.state().dead_letters.clone()
    }

    pub fn server_id(&self, client_id: &str) -> Option<String> {
        self.state().confirmed_ids.get(client_id).cloned()
    }

    /// Snapshot of the live queue.
    pub fn entries(&self) -> Vec<OutboxEntry> {
        self.state().queue.clone()
    }

    pub fn entry(&self, client_id: &str) -> Option<OutboxEntry> {
        let state = self.state();
        state.position(client_id).map(|i| state.queue[i].clone())
    }

    pub fn stats(&self) -> OutboxStats {
        self.state().stats()
    }

    /// Receiver updated after every state change.
    pub fn subscribe(&self) -> watch::Receiver<OutboxStats> {
        self.inner.stats_tx.subscribe()
    }
}

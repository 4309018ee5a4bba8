mod common;

use async_trait::async_trait;
use common::{harness, harness_with_store, response, Harness, ScriptedTransport};
use hemisphere::outbox::{EntryStatus, Outbox, OutboxEntry, ResponseTransport};
use hemisphere::storage::{KeyValueStore, MemoryStore};
use hemisphere::{OutboxConfig, OutboxError, TransportError, UserResponse};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

fn net_err() -> Result<String, TransportError> {
    Err(TransportError::Network("connection reset".into()))
}

/// Walk the default schedule (attempt, 1s, 2s) until the entry dead-letters.
async fn run_through_backoff(h: &Harness) {
    h.scheduler.run_due().await;
    h.scheduler.advance(Duration::from_millis(1000)).await;
    h.scheduler.advance(Duration::from_millis(2000)).await;
}

#[tokio::test]
async fn test_confirmed_entries_are_pruned() {
    let h = harness();
    let transport = ScriptedTransport::always_ok();
    for id in ["r1", "r2", "r3"] {
        h.outbox.enqueue_response(response(id));
    }
    h.outbox.configure(transport.clone());
    h.scheduler.run_due().await;

    for id in ["r1", "r2", "r3"] {
        assert_eq!(h.outbox.server_id(id), Some(format!("srv-{}", id)));
        assert!(h.outbox.entry(id).is_none());
    }
    assert_eq!(h.outbox.pending_count(), 0);

    // A confirmed response is never delivered twice
    assert!(!h.outbox.enqueue_response(response("r1")));
    h.scheduler.run_due().await;
    assert_eq!(transport.calls().len(), 3);
}

#[tokio::test]
async fn test_attempts_bounded_then_dead_lettered() {
    let h = harness();
    let transport = ScriptedTransport::always_fail();
    h.outbox.configure(transport.clone());
    h.outbox.enqueue_response(response("r1"));

    h.scheduler.run_due().await;
    assert_eq!(h.outbox.entry("r1").unwrap().attempts(), 1);

    h.scheduler.advance(Duration::from_millis(1000)).await;
    let entry = h.outbox.entry("r1").unwrap();
    assert_eq!(entry.attempts(), 2);
    assert_eq!(entry.status(), EntryStatus::Retrying);

    // Second backoff is twice the first
    h.scheduler.advance(Duration::from_millis(1999)).await;
    assert_eq!(transport.calls().len(), 2);
    h.scheduler.advance(Duration::from_millis(1)).await;

    assert!(h.outbox.entry("r1").is_none());
    assert!(h.outbox.has_dead_letters());
    let dead = h.outbox.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].entry().attempts(), 3);
    assert_eq!(dead[0].entry().status(), EntryStatus::Failed);
    assert_eq!(
        dead[0].entry().last_error(),
        Some("Network error: unreachable")
    );

    // Dead letters are never retried automatically
    h.scheduler.advance(Duration::from_secs(60)).await;
    assert_eq!(transport.calls().len(), 3);
    assert_eq!(h.scheduler.pending_tasks(), 0);
}

#[tokio::test]
async fn test_oldest_entry_is_attempted_first() {
    let h = harness();
    let transport = ScriptedTransport::always_ok();
    h.outbox.enqueue_response(response("a"));
    h.clock.advance(chrono::Duration::milliseconds(5));
    h.outbox.enqueue_response(response("b"));
    h.outbox.configure(transport.clone());
    h.scheduler.run_due().await;

    assert_eq!(transport.calls(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_failed_entry_does_not_block_younger_entries() {
    let h = harness();
    let transport = ScriptedTransport::scripted(vec![net_err()], true);
    h.outbox.enqueue_response(response("a"));
    h.outbox.enqueue_response(response("b"));
    h.outbox.configure(transport.clone());
    h.scheduler.run_due().await;

    assert_eq!(transport.calls(), vec!["a", "b"]);
    assert_eq!(h.outbox.pending_count(), 1);

    h.scheduler.advance(Duration::from_millis(1000)).await;
    assert_eq!(transport.calls(), vec!["a", "b", "a"]);
    assert_eq!(h.outbox.server_id("a").as_deref(), Some("srv-a"));
}

#[tokio::test]
async fn test_revive_resets_entry() {
    let h = harness();
    let transport = ScriptedTransport::scripted(vec![net_err(), net_err(), net_err()], true);
    h.outbox.configure(transport.clone());
    h.outbox.enqueue_response(response("r1"));
    run_through_backoff(&h).await;
    assert!(h.outbox.has_dead_letters());

    h.outbox.revive_dead_letter("r1").unwrap();
    let revived = h.outbox.entry("r1").unwrap();
    assert_eq!(revived.status(), EntryStatus::Pending);
    assert_eq!(revived.attempts(), 0);
    assert_eq!(revived.retry_after(), None);
    assert_eq!(revived.last_error(), None);
    assert!(!h.outbox.has_dead_letters());

    h.scheduler.run_due().await;
    assert_eq!(h.outbox.server_id("r1").as_deref(), Some("srv-r1"));
}

#[tokio::test]
async fn test_dismiss_discards_dead_letter() {
    let h = harness();
    h.outbox.configure(ScriptedTransport::always_fail());
    h.outbox.enqueue_response(response("r1"));
    run_through_backoff(&h).await;
    assert!(h.outbox.has_dead_letters());

    assert!(h.outbox.dismiss_dead_letter("r1"));
    assert!(!h.outbox.dismiss_dead_letter("r1"));
    assert!(!h.outbox.has_dead_letters());
    assert_eq!(
        h.outbox.revive_dead_letter("r1"),
        Err(OutboxError::DeadLetterNotFound("r1".into()))
    );
}

#[tokio::test]
async fn test_offline_flush_consumes_no_attempt() {
    let h = harness();
    let transport = ScriptedTransport::always_ok();
    h.outbox.set_online(false);
    h.outbox.enqueue_response(response("r1"));
    h.outbox.configure(transport.clone());
    h.scheduler.run_due().await;

    let entry = h.outbox.entry("r1").unwrap();
    assert_eq!(entry.attempts(), 0);
    assert_eq!(entry.status(), EntryStatus::Pending);
    assert!(transport.calls().is_empty());

    // Coming back online drains the queue
    h.outbox.set_online(true);
    h.scheduler.run_due().await;
    assert_eq!(h.outbox.pending_count(), 0);
}

#[tokio::test]
async fn test_offline_during_backoff_keeps_attempt_count() {
    let h = harness();
    let transport = ScriptedTransport::scripted(vec![net_err()], true);
    h.outbox.configure(transport.clone());
    h.outbox.enqueue_response(response("r1"));
    h.scheduler.run_due().await;

    h.network.set_online(false);
    h.scheduler.advance(Duration::from_millis(5000)).await;
    let entry = h.outbox.entry("r1").unwrap();
    assert_eq!(entry.attempts(), 1);
    assert_eq!(entry.status(), EntryStatus::Retrying);
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test]
async fn test_sending_entry_rehydrates_as_pending() {
    let store = Arc::new(MemoryStore::new());
    let mut raw =
        serde_json::to_value(OutboxEntry::new(response("r1"), chrono::Utc::now())).unwrap();
    raw["status"] = serde_json::json!("sending");
    raw["retryAfter"] = serde_json::json!("2030-01-01T00:00:00Z");
    store
        .set_item(
            "hemisphere:outbox:v1",
            &serde_json::to_string(&vec![raw]).unwrap(),
        )
        .unwrap();

    let h = harness_with_store(store);
    assert_eq!(h.outbox.rehydrate(), 1);
    let entry = h.outbox.entry("r1").unwrap();
    assert_eq!(entry.status(), EntryStatus::Pending);
    assert_eq!(entry.retry_after(), None);
}

#[tokio::test]
async fn test_restart_resumes_backoff_from_persisted_state() {
    let store = Arc::new(MemoryStore::new());
    let first = harness_with_store(store.clone());
    first.outbox.configure(ScriptedTransport::always_fail());
    first.outbox.enqueue_response(response("r1"));
    first.scheduler.run_due().await;
    drop(first);

    let second = harness_with_store(store);
    let transport = ScriptedTransport::always_ok();
    second.outbox.configure(transport.clone());
    assert_eq!(second.outbox.rehydrate(), 1);
    second.scheduler.run_due().await;

    let entry = second.outbox.entry("r1").unwrap();
    assert_eq!(entry.attempts(), 1);
    assert_eq!(entry.status(), EntryStatus::Retrying);
    assert!(transport.calls().is_empty());

    second.scheduler.advance(Duration::from_millis(1000)).await;
    assert_eq!(second.outbox.server_id("r1").as_deref(), Some("srv-r1"));
}

#[tokio::test]
async fn test_rehydrate_merges_only_unknown_entries() {
    let store = Arc::new(MemoryStore::new());
    let first = harness_with_store(store.clone());
    first.outbox.enqueue_response(response("r1"));
    first.outbox.enqueue_response(response("r2"));

    let second = harness_with_store(store);
    assert_eq!(second.outbox.rehydrate(), 2);
    assert_eq!(second.outbox.rehydrate(), 0);

    second.outbox.enqueue_response(response("r3"));
    assert_eq!(second.outbox.rehydrate(), 0);
    assert_eq!(second.outbox.pending_count(), 3);

    // The first instance picks up what the second one wrote
    assert_eq!(first.outbox.rehydrate(), 1);
    assert_eq!(first.outbox.pending_count(), 3);
}

#[tokio::test]
async fn test_dead_letters_survive_restart() {
    let store = Arc::new(MemoryStore::new());
    let first = harness_with_store(store.clone());
    first.outbox.configure(ScriptedTransport::always_fail());
    first.outbox.enqueue_response(response("r1"));
    run_through_backoff(&first).await;
    assert!(first.outbox.has_dead_letters());
    drop(first);

    let second = harness_with_store(store);
    second.outbox.rehydrate();
    assert!(second.outbox.has_dead_letters());
    assert_eq!(second.outbox.pending_count(), 0);

    second.outbox.configure(ScriptedTransport::always_ok());
    second.outbox.revive_dead_letter("r1").unwrap();
    second.scheduler.run_due().await;
    assert_eq!(second.outbox.server_id("r1").as_deref(), Some("srv-r1"));
}

#[tokio::test]
async fn test_storage_failure_does_not_stop_delivery() {
    let h = harness_with_store(Arc::new(MemoryStore::with_quota(0)));
    h.outbox.configure(ScriptedTransport::always_ok());
    h.outbox.enqueue_response(response("r1"));
    assert_eq!(h.outbox.pending_count(), 1);
    h.scheduler.run_due().await;
    assert_eq!(h.outbox.server_id("r1").as_deref(), Some("srv-r1"));
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_tokio_scheduler_retries_until_delivered() {
    let config = OutboxConfig {
        base_delay_ms: 5,
        ..OutboxConfig::default()
    };
    let outbox = Outbox::builder(&config, Arc::new(MemoryStore::new())).build();
    let transport = ScriptedTransport::scripted(vec![net_err(), net_err()], true);
    let mut stats = outbox.subscribe();

    outbox.configure(transport.clone());
    outbox.enqueue_response(response("r1"));

    tokio::time::timeout(Duration::from_secs(5), stats.wait_for(|s| s.confirmed == 1))
        .await
        .expect("delivery timed out")
        .unwrap();
    assert_eq!(transport.calls().len(), 3);
    assert_eq!(outbox.server_id("r1").as_deref(), Some("srv-r1"));
    assert!(!outbox.has_dead_letters());
}

#[tokio::test]
async fn test_entry_past_attempt_limit_rehydrates_as_dead_letter() {
    let store = Arc::new(MemoryStore::new());
    let mut spent =
        serde_json::to_value(OutboxEntry::new(response("r1"), chrono::Utc::now())).unwrap();
    spent["status"] = serde_json::json!("retrying");
    spent["attempts"] = serde_json::json!(5);
    let fresh =
        serde_json::to_value(OutboxEntry::new(response("r2"), chrono::Utc::now())).unwrap();
    store
        .set_item(
            "hemisphere:outbox:v1",
            &serde_json::to_string(&vec![spent, fresh]).unwrap(),
        )
        .unwrap();

    let h = harness_with_store(store);
    let transport = ScriptedTransport::always_ok();
    h.outbox.configure(transport.clone());
    assert_eq!(h.outbox.rehydrate(), 2);

    let dead = h.outbox.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].client_id(), "r1");
    assert_eq!(dead[0].entry().attempts(), 5);
    assert_eq!(dead[0].entry().status(), EntryStatus::Failed);

    h.scheduler.run_due().await;
    assert_eq!(transport.calls(), vec!["r2"]);
    assert_eq!(h.outbox.pending_count(), 0);
}

/// Holds the first submission until released; later ones succeed at once.
struct GatedTransport {
    started: Notify,
    release: Notify,
    gated: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl GatedTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Notify::new(),
            release: Notify::new(),
            gated: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResponseTransport for GatedTransport {
    async fn submit(&self, response: &UserResponse) -> Result<String, TransportError> {
        self.calls.lock().unwrap().push(response.id.clone());
        if self.gated.swap(false, Ordering::SeqCst) {
            self.started.notify_one();
            self.release.notified().await;
        }
        Ok(format!("srv-{}", response.id))
    }
}

#[tokio::test]
async fn test_enqueue_during_send_is_delivered_by_same_flush() {
    let outbox = Outbox::builder(&OutboxConfig::default(), Arc::new(MemoryStore::new())).build();
    let transport = GatedTransport::new();
    let mut stats = outbox.subscribe();
    outbox.configure(transport.clone());
    outbox.enqueue_response(response("a"));
    transport.started.notified().await;

    // "a" is in flight; the flush scheduled for "b" finds the flag taken
    outbox.enqueue_response(response("b"));
    tokio::task::yield_now().await;
    assert_eq!(outbox.entry("b").unwrap().status(), EntryStatus::Pending);
    transport.release.notify_one();

    tokio::time::timeout(Duration::from_secs(5), stats.wait_for(|s| s.confirmed == 2))
        .await
        .expect("second entry was never delivered")
        .unwrap();
    assert_eq!(transport.calls(), vec!["a", "b"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_burst_enqueues_never_strand_entries() {
    for run in 0..200 {
        let outbox =
            Outbox::builder(&OutboxConfig::default(), Arc::new(MemoryStore::new())).build();
        outbox.configure(ScriptedTransport::always_ok());
        let mut stats = outbox.subscribe();
        for i in 0..50 {
            outbox.enqueue_response(response(&format!("r{}-{}", run, i)));
        }

        let drained = tokio::time::timeout(
            Duration::from_secs(2),
            stats.wait_for(|s| s.pending == 0 && s.confirmed == 50),
        )
        .await;
        assert!(
            matches!(drained, Ok(Ok(_))),
            "run {}: {} entries left pending",
            run,
            outbox.pending_count()
        );
    }
}

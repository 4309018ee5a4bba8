//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use hemisphere::clock::ManualClock;
use hemisphere::outbox::{FixedJitter, ManualScheduler, NetworkStatus, Outbox, ResponseTransport};
use hemisphere::response::{Modality, UserResponse};
use hemisphere::storage::{KeyValueStore, MemoryStore};
use hemisphere::{OutboxConfig, TransportError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Transport that replays a script of results, then falls back to a default.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<String, TransportError>>>,
    calls: Mutex<Vec<String>>,
    succeed_by_default: bool,
}

impl ScriptedTransport {
    pub fn always_ok() -> Arc<Self> {
        Self::scripted(vec![], true)
    }

    pub fn always_fail() -> Arc<Self> {
        Self::scripted(vec![], false)
    }

    pub fn scripted(
        results: Vec<Result<String, TransportError>>,
        succeed_by_default: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(results.into()),
            calls: Mutex::new(Vec::new()),
            succeed_by_default,
        })
    }

    /// Client ids in the order they were submitted.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResponseTransport for ScriptedTransport {
    async fn submit(&self, response: &UserResponse) -> Result<String, TransportError> {
        self.calls.lock().unwrap().push(response.id.clone());
        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(result) => result,
            None if self.succeed_by_default => Ok(format!("srv-{}", response.id)),
            None => Err(TransportError::Network("unreachable".into())),
        }
    }
}

pub struct Harness {
    pub outbox: Outbox,
    pub scheduler: Arc<ManualScheduler>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
    pub network: Arc<NetworkStatus>,
}

pub fn harness() -> Harness {
    harness_with_store(Arc::new(MemoryStore::new()))
}

/// Outbox on a virtual clock with jitter disabled, so retry delays are
/// exactly 1s, 2s, 4s.
pub fn harness_with_store(store: Arc<MemoryStore>) -> Harness {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let scheduler = Arc::new(ManualScheduler::new(clock.clone()));
    let network = Arc::new(NetworkStatus::new(true));
    let outbox = Outbox::builder(
        &OutboxConfig::default(),
        store.clone() as Arc<dyn KeyValueStore>,
    )
    .with_clock(clock.clone())
    .with_scheduler(scheduler.clone())
    .with_jitter(Arc::new(FixedJitter(0.5)))
    .with_network(network.clone())
    .build();
    Harness {
        outbox,
        scheduler,
        clock,
        store,
        network,
    }
}

pub fn response(id: &str) -> UserResponse {
    let now = Utc::now();
    UserResponse {
        id: id.to_string(),
        item_id: format!("item-{}", id),
        stage: "analysis".to_string(),
        started_at: now,
        submitted_at: now,
        latency_ms: 850,
        modality: Modality::Tap,
        value: serde_json::json!({"choice": "B"}),
        is_correct: Some(true),
        quality: None,
        self_confidence: None,
    }
}

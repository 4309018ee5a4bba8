//! Simulated delivery endpoint that drops a share of submissions.

use async_trait::async_trait;
use hemisphere::outbox::ResponseTransport;
use hemisphere::{TransportError, UserResponse};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

pub struct FlakyTransport {
    failure_rate: f64,
    latency: Duration,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl FlakyTransport {
    pub fn new(failure_rate: f64, latency: Duration) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            latency,
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ResponseTransport for FlakyTransport {
    async fn submit(&self, response: &UserResponse) -> Result<String, TransportError> {
        let roll: f64 = rand::thread_rng().gen();
        tokio::time::sleep(self.latency).await;

        if roll < self.failure_rate {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("[Sim] Dropping {}", response.id);
            // Split simulated failures between the two transient kinds
            return Err(if roll < self.failure_rate / 2.0 {
                TransportError::Timeout(self.latency.as_millis() as u64)
            } else {
                TransportError::Network("simulated connection reset".to_string())
            });
        }

        let seq = self.accepted.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(format!("srv-{:06}", seq))
    }
}

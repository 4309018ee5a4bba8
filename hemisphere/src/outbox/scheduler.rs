//! Delayed task execution for flush triggers and retry timers.
//!
//! Production code runs tasks on tokio. Tests use [`ManualScheduler`], which
//! keeps tasks until its [`ManualClock`] is advanced past their due time, so
//! backoff can be exercised without real sleeps.

use crate::clock::{Clock, ManualClock};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::warn;

pub trait TaskScheduler: Send + Sync {
    /// Run `task` once `delay` has elapsed. Fire-and-forget.
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>);
}

/// Spawns tasks onto the ambient tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl TaskScheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    task.await;
                });
            }
            Err(_) => {
                warn!(
                    "[Outbox] No tokio runtime available; dropping task scheduled in {:?}",
                    delay
                );
            }
        }
    }
}

struct ScheduledTask {
    due: DateTime<Utc>,
    seq: u64,
    task: BoxFuture<'static, ()>,
}

/// Virtual-time scheduler driven by a [`ManualClock`].
pub struct ManualScheduler {
    clock: Arc<ManualClock>,
    tasks: Mutex<Vec<ScheduledTask>>,
    next_seq: AtomicU64,
}

impl ManualScheduler {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            tasks: Mutex::new(Vec::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Due time of the earliest queued task.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|t| t.due)
            .min()
    }

    /// Run every task due at the current virtual time, in (due, schedule)
    /// order, including tasks those tasks schedule with no delay.
    /// Returns how many ran.
    pub async fn run_due(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = {
                let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
                let now = self.clock.now();
                let index = tasks
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due <= now)
                    .min_by_key(|(_, t)| (t.due, t.seq))
                    .map(|(i, _)| i);
                index.map(|i| tasks.remove(i))
            };
            match next {
                Some(scheduled) => {
                    scheduled.task.await;
                    ran += 1;
                }
                None => break,
            }
        }
        ran
    }

    /// Move the virtual clock forward and run whatever became due.
    pub async fn advance(&self, by: Duration) -> usize {
        self.clock
            .advance(chrono::Duration::milliseconds(by.as_millis() as i64));
        self.run_due().await
    }
}

impl TaskScheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) {
        let due = self.clock.now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ScheduledTask { due, seq, task });
    }
}

//! Retry delay computation: exponential growth with symmetric jitter.

use crate::config::{OutboxConfig, MAX_RETRY_DELAY_MS};
use rand::Rng;
use std::time::Duration;

/// Source of uniform samples in [0, 1) used to perturb delays.
pub trait JitterSource: Send + Sync {
    fn sample(&self) -> f64;
}

/// Jitter from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn sample(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Always returns the same sample. 0.5 means "no jitter".
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn sample(&self) -> f64 {
        self.0
    }
}

/// `delay = base * factor^(attempt - 1)`, plus `delay * ratio * (2 * sample - 1)`,
/// capped at [`MAX_RETRY_DELAY_MS`].
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub factor: f64,
    pub jitter_ratio: f64,
}

impl BackoffPolicy {
    pub fn from_config(config: &OutboxConfig) -> Self {
        Self {
            base_delay_ms: config.base_delay_ms,
            factor: config.backoff_factor,
            jitter_ratio: config.jitter_ratio,
        }
    }

    /// Un-jittered delay in milliseconds for a 1-based attempt number.
    pub fn raw_delay_ms(&self, attempt: u32) -> f64 {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        self.base_delay_ms as f64 * self.factor.powi(exponent)
    }

    pub fn delay_for(&self, attempt: u32, jitter: &dyn JitterSource) -> Duration {
        let cap = MAX_RETRY_DELAY_MS as f64;
        let raw = self.raw_delay_ms(attempt).min(cap);
        let offset = raw * self.jitter_ratio * (2.0 * jitter.sample() - 1.0);
        let millis = (raw + offset).round().clamp(0.0, cap);
        Duration::from_millis(millis as u64)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&OutboxConfig::default())
    }
}

//! Retry with exponential backoff for transient command failures.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

/// How often and how patiently to retry a failed sync or refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier applied per further retry
    pub backoff_factor: f64,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_retry()
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            max_delay: Duration::from_secs(60),
        }
    }

    /// A single attempt, never retried
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }

    /// Delay after failed attempt `attempt` (0-indexed), always within
    /// `0..=max_delay` whatever the factor
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if delay.is_nan() {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(delay.clamp(0.0, self.max_delay.as_secs_f64()))
    }
}

/// Notified before each retry
pub trait RetryCallback {
    /// `attempt` is the 1-indexed attempt that just failed
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay: Duration);
}

/// Ignores retry notifications
pub struct NoCallback;

impl RetryCallback for NoCallback {
    fn on_retry(&self, _attempt: u32, _max_attempts: u32, _error: &Error, _delay: Duration) {}
}

/// Run `operation`, retrying retryable errors per `policy`.
///
/// Non-retryable errors are returned immediately.
pub fn with_retry<T, F>(
    policy: &RetryPolicy,
    callback: &dyn RetryCallback,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() || attempt + 1 >= attempts => return Err(e),
            Err(e) => {
                let delay = policy.delay_for_attempt(attempt);
                callback.on_retry(attempt + 1, attempts, &e, delay);
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

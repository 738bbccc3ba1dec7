//! Bounded retry with exponential backoff for transient storage failures.

use crate::error::JobResult;
use std::time::Duration;
use tracing::warn;

/// Retry policy for operations that may hit transient storage failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Backoff multiplier (2.0 doubles the delay each retry).
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self { max_retries, initial_delay, max_delay, multiplier }
    }

    /// Delay before retry number `retry_count` (zero-based).
    ///
    /// `initial_delay * multiplier^retry_count`, capped at `max_delay`.
    pub fn calculate_delay(&self, retry_count: u32) -> Duration {
        let delay_ms = (self.initial_delay.as_millis() as f64 * self.multiplier.powi(retry_count as i32))
            .min(self.max_delay.as_millis() as f64) as u64;
        Duration::from_millis(delay_ms)
    }

    /// Run `op`, re-attempting it while it fails with a transient error and retries remain.
    ///
    /// Blocks the calling thread between attempts. Non-transient errors are returned immediately.
    pub fn run<T, F>(&self, operation: &str, mut op: F) -> JobResult<T>
    where
        F: FnMut() -> JobResult<T>,
    {
        let mut retry_count = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && retry_count < self.max_retries => {
                    let delay = self.calculate_delay(retry_count);
                    warn!(
                        operation,
                        retry_count = retry_count + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying after transient failure"
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    retry_count += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

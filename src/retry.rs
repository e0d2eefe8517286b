//! Bounded retry with exponential backoff.

use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.  Never less than 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Sleep before attempt `attempt + 1`: `base × 2^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with an error `retryable` rejects, or
    /// runs out of attempts.  On exhaustion the last error is handed to
    /// `exhausted` together with the attempt count.
    pub fn run<T>(
        &self,
        label: &str,
        retryable: impl Fn(&AppError) -> bool,
        exhausted: impl FnOnce(AppError, u32) -> AppError,
        mut op: impl FnMut(u32) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(out) => return Ok(out),
                Err(e) if retryable(&e) => {
                    if attempt >= max {
                        return Err(exhausted(e, attempt));
                    }
                    let delay = self.delay_for(attempt);
                    debug!(label, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retry: backing off");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

//! Bounded retry with exponential backoff for oracle calls.
//!
//! Retries only [`OracleError::Transient`]. After the last attempt a transient
//! error is escalated to [`OracleError::Fatal`] so callers see a single,
//! terminal failure.

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::io::oracle::OracleError;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first call.
    pub attempts: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            min_wait: Duration::from_secs(2),
            max_wait: Duration::from_secs(10),
            multiplier: 1.0,
        }
    }
}

impl RetryPolicy {
    /// Wait after the `attempt`-th failed call (1-based):
    /// `multiplier * 2^(attempt - 1)` seconds, clamped to `[min_wait, max_wait]`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = 2f64.powi(attempt.saturating_sub(1).min(30) as i32);
        let secs = self.multiplier * exp;
        let wait = if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs.min(self.max_wait.as_secs_f64()))
        } else {
            Duration::ZERO
        };
        wait.clamp(self.min_wait, self.max_wait.max(self.min_wait))
    }

    /// Run `op`, sleeping on the current thread between attempts.
    pub fn run<T>(
        &self,
        label: &str,
        op: impl FnMut() -> Result<T, OracleError>,
    ) -> Result<T, OracleError> {
        self.run_with_sleep(label, op, thread::sleep)
    }

    /// Like [`RetryPolicy::run`] with an injectable sleep.
    pub fn run_with_sleep<T>(
        &self,
        label: &str,
        mut op: impl FnMut() -> Result<T, OracleError>,
        mut sleep: impl FnMut(Duration),
    ) -> Result<T, OracleError> {
        let attempts = self.attempts.max(1);
        let mut attempt = 1u32;
        loop {
            match op() {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(label, attempt, "oracle call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(OracleError::Transient(msg)) if attempt < attempts => {
                    let wait = self.backoff(attempt);
                    warn!(
                        label,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        err = %msg,
                        "transient oracle failure, retrying"
                    );
                    sleep(wait);
                    attempt += 1;
                }
                Err(OracleError::Transient(msg)) => {
                    warn!(label, attempts, err = %msg, "oracle retries exhausted");
                    return Err(OracleError::Fatal(format!(
                        "{msg} (gave up after {attempts} attempts)"
                    )));
                }
                Err(fatal) => return Err(fatal),
            }
        }
    }
}

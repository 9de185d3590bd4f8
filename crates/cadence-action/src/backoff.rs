//! Timeout and exponential-backoff retry for flaky operations.
//!
//! Attempt `n` (0-based) may run for `timeout * factor^n`. After a timeout
//! or retryable error the executor waits the same scaled duration before the
//! next attempt, so both the wait and the allowed run time grow. A timed-out
//! attempt's future is dropped, which cancels it at its next await point.

use std::future::Future;
use std::time::Duration;

use cadence_core::config::BackoffConfig;

use crate::error::ActionError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Window for the first attempt.
    pub timeout: Duration,
    /// Retries after the first attempt. `0` gives a single bounded attempt.
    pub retries: u32,
    pub backoff_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            retries: config.retries,
            backoff_factor: config.backoff_factor,
        }
    }

    /// `timeout * factor^attempt`, saturating instead of overflowing.
    pub fn scaled(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.backoff_factor.max(0.0).powi(exponent);
        let nanos = (self.timeout.as_nanos() as f64 * factor).round();
        if nanos.is_finite() && nanos < u64::MAX as f64 {
            Duration::from_nanos(nanos as u64)
        } else {
            Duration::MAX
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BackoffExecutor {
    policy: BackoffPolicy,
}

impl BackoffExecutor {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Run `op` under the policy, returning the first success or the last error.
    ///
    /// Non-retryable errors are returned immediately.
    pub async fn with_timeout<T, F, Fut>(&self, mut op: F) -> Result<T, ActionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ActionError>>,
    {
        let mut attempt = 0u32;
        loop {
            let window = self.policy.scaled(attempt);
            let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
            let outcome = match tokio::time::timeout(window, op()).await {
                Ok(result) => result,
                Err(_) => Err(ActionError::Timeout(window_ms)),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= self.policy.retries => {
                    tracing::warn!(attempts = attempt + 1, error = %e, "Retries exhausted");
                    return Err(e);
                }
                Err(e) => {
                    tracing::debug!(
                        attempt,
                        wait_ms = window_ms,
                        error = %e,
                        "Attempt failed, backing off"
                    );
                    tokio::time::sleep(window).await;
                    attempt += 1;
                }
            }
        }
    }
}

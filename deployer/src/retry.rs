//! Shared retry and backoff for transient operations

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::errors::DeployError;

/// Retry policy with exponential backoff and jitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Fraction of each delay randomly added or removed (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Policy retrying `attempts` times without waiting in between
    pub fn no_delay(attempts: u32) -> Self {
        Self {
            attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Delay before retry number `attempt` (0-based), before jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay_ms = self.base_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        let capped = delay_ms.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        delay.mul_f64(factor)
    }
}

/// Run `op` until it succeeds, fails with an error `is_retryable` rejects,
/// runs out of attempts, or `cancel` fires.
pub async fn retry<T, F, Fut, P>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    op_name: &str,
    is_retryable: P,
    mut op: F,
) -> Result<T, DeployError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DeployError>>,
    P: Fn(&DeployError) -> bool,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(DeployError::Cancelled(op_name.to_string()));
        }

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        attempt += 1;
        if attempt >= attempts || !is_retryable(&err) {
            return Err(err);
        }

        let delay = policy.jittered(policy.backoff(attempt - 1));
        warn!(
            op = op_name,
            attempt,
            max_attempts = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying after transient failure"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(DeployError::Cancelled(op_name.to_string()));
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// [`retry`] with the default transient-error classification
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    op_name: &str,
    op: F,
) -> Result<T, DeployError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DeployError>>,
{
    retry(policy, cancel, op_name, DeployError::is_transient, op).await
}

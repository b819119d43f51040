//! Centralized retry policy.
//!
//! Page fetches and direct source fetches both go through [`retry_with_policy`].
//! Errors decide for themselves whether they are worth retrying by
//! implementing [`Retryable`].

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics;

/// How an error should be treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Timeouts, connection resets, 5xx.
    Transient,
    /// Upstream asked us to slow down, optionally saying for how long.
    RateLimited { retry_after_ms: Option<u64> },
    /// Retrying cannot help.
    Fatal,
}

/// Errors that can classify themselves for the retry loop.
pub trait Retryable {
    fn retry_class(&self) -> RetryClass;
}

/// Exponential backoff policy with separate budgets for transient failures
/// and rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts (first try included) for transient failures.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Total attempts (first try included) while rate limited.
    #[serde(default = "default_max_rate_limit_attempts")]
    pub max_rate_limit_attempts: u32,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay, in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_max_rate_limit_attempts() -> u32 {
    8
}

fn default_initial_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_rate_limit_attempts: default_max_rate_limit_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            max_rate_limit_attempts: 1,
            ..Self::default()
        }
    }

    /// Sets both attempt budgets and uses millisecond-scale delays. Handy in tests.
    pub fn fast(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            max_rate_limit_attempts: max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        }
    }

    /// Backoff before retry number `retry` (0-based):
    /// `min(initial * multiplier^retry, max)`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(retry as i32);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }

    /// Delay for a rate-limited retry. A provider hint wins over the computed
    /// backoff but is still capped at `max_delay_ms`.
    fn rate_limit_delay(&self, retry: u32, retry_after_ms: Option<u64>) -> Duration {
        match retry_after_ms {
            Some(hint) => Duration::from_millis(hint.min(self.max_delay_ms)),
            None => self.backoff(retry),
        }
    }
}

/// Run `op` until it succeeds, fails fatally, or exhausts its budget.
///
/// `operation` labels log lines and the retry metric. When `cancel` fires
/// during a back-off sleep the last error is returned immediately; callers
/// check the token to tell cancellation apart from failure.
pub async fn retry_with_policy<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    cancel: Option<&CancellationToken>,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut transient_attempts = 0u32;
    let mut rate_limit_attempts = 0u32;

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let delay = match err.retry_class() {
            RetryClass::Fatal => return Err(err),
            RetryClass::Transient => {
                transient_attempts += 1;
                if transient_attempts >= policy.max_attempts.max(1) {
                    warn!(operation, attempts = transient_attempts, error = %err, "Retries exhausted");
                    return Err(err);
                }
                policy.backoff(transient_attempts - 1)
            }
            RetryClass::RateLimited { retry_after_ms } => {
                rate_limit_attempts += 1;
                if rate_limit_attempts >= policy.max_rate_limit_attempts.max(1) {
                    warn!(operation, attempts = rate_limit_attempts, error = %err, "Still rate limited, giving up");
                    return Err(err);
                }
                policy.rate_limit_delay(rate_limit_attempts - 1, retry_after_ms)
            }
        };

        metrics::RETRY_ATTEMPTS.with_label_values(&[operation]).inc();
        debug!(operation, delay_ms = delay.as_millis() as u64, error = %err, "Retrying");

        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => return Err(err),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }
}

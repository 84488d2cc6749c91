use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::errors::ErrorContext;
use crate::errors::Result;
use crate::errors::is_retryable;
use crate::errors::keys;

/// Backoff policy for retried calls
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Re-attempts after the first call; total attempts are `max_retries + 1`
    pub max_retries: u32,

    /// Delay before the first re-attempt
    pub base_delay_ms: u64,

    /// Upper bound on any single delay
    pub max_delay_ms: u64,

    /// Growth factor between consecutive delays
    pub backoff_multiplier: f64,

    /// Randomize each delay within `[delay / 2, delay]`
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 3, base_delay_ms: 1_000, max_delay_ms: 10_000, backoff_multiplier: 2.0, jitter: true }
    }
}

impl RetryConfig {
    /// A single attempt with no delay
    pub fn none() -> Self {
        Self { max_retries: 0, ..Default::default() }
    }

    /// Delay before re-attempt number `attempt` (0-based), without jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.clamp(0.0, self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Delay actually waited before re-attempt `attempt`
    pub fn backoff<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if !self.jitter {
            return delay;
        }

        let millis = delay.as_millis() as u64;
        let floor = millis / 2;
        if millis == floor {
            return delay;
        }
        Duration::from_millis(rng.gen_range(floor..=millis))
    }
}

/// Timer used between attempts
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Sleeps on the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Runs an operation under a [`RetryConfig`]
///
/// Attempts are strictly sequential: the next one starts only after the
/// previous failure has been classified and its delay has elapsed.
#[derive(Clone)]
pub struct RetryExecutor {
    sleeper: Arc<dyn Sleeper>,
}

impl RetryExecutor {
    pub fn new() -> Self {
        Self::with_sleeper(Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(sleeper: Arc<dyn Sleeper>) -> Self {
        Self { sleeper }
    }

    /// Call `operation` until it succeeds, fails with a non-retryable error,
    /// or `max_retries` re-attempts have been used; the last error is returned
    pub async fn retry<F, Fut, T>(&self, mut operation: F, config: &RetryConfig, context: &ErrorContext) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let request_id = context.get(keys::REQUEST_ID).map(|v| v.to_string()).unwrap_or_default();
        let mut attempt = 0u32;

        loop {
            let err = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(request_id = %request_id, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !is_retryable(&err) {
                debug!(request_id = %request_id, kind = %err.kind(), "Not retrying non-retryable failure");
                return Err(err);
            }
            if attempt >= config.max_retries {
                warn!(request_id = %request_id, attempts = attempt + 1, kind = %err.kind(), "Retries exhausted");
                return Err(err);
            }

            let delay = config.backoff(attempt, &mut rand::thread_rng());
            warn!(
                request_id = %request_id,
                attempt = attempt + 1,
                max_retries = config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after failure"
            );
            self.sleeper.sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor").finish_non_exhaustive()
    }
}

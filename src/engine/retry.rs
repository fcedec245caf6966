// Capped exponential backoff for transient API failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::api::error::{ApiError, ApiResult};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// One attempt, no waiting.
    pub fn none() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// Delay before retry number `retry` (0-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self.initial_backoff_ms as f64 * self.multiplier.max(1.0).powi(retry as i32);
        let capped = base.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }

    fn delay(&self, retry: u32) -> Duration {
        let base = self.backoff(retry);
        if !self.jitter || base.is_zero() {
            return base;
        }
        // Up to +25%, still within the cap.
        let spread = (base.as_millis() as u64 / 4).max(1);
        let extra = rand::thread_rng().gen_range(0..=spread);
        (base + Duration::from_millis(extra)).min(Duration::from_millis(self.max_backoff_ms.max(1)))
    }

    /// Retry `op` while it fails with a transient error.
    pub async fn run<T, F, Fut>(&self, label: &str, op: F) -> ApiResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        self.run_when(label, ApiError::is_transient, op).await
    }

    /// Retry `op` while `retryable` says so, up to `max_attempts` calls in total.
    pub async fn run_when<T, F, Fut, P>(&self, label: &str, retryable: P, mut op: F) -> ApiResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
        P: Fn(&ApiError) -> bool,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && retryable(&e) => {
                    let wait = self.delay(attempt - 1);
                    debug!(label, attempt, wait_ms = wait.as_millis() as u64, error = %e, "retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    if attempt > 1 {
                        warn!(label, attempts = attempt, error = %e, "giving up after retries");
                    }
                    return Err(e);
                }
            }
        }
    }
}

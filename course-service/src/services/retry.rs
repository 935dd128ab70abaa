//! Bounded retry of aborted store transactions.
//!
//! Transactional store calls take a closure that is re-run against freshly
//! read state on every attempt, so retrying a conflict never applies a
//! decision made on stale data.

use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::CourseError;
use crate::services::metrics::record_transaction_retry;

/// Configuration for transaction retry behavior.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each backoff.
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(25),
            max_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Retries without sleeping, for tests that inject conflicts.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    pub(crate) fn backoff_duration(&self, attempt: u32) -> Duration {
        let backoff =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let backoff_ms = backoff.min(self.max_backoff.as_millis() as f64) as u64;

        let mut duration = Duration::from_millis(backoff_ms);
        if self.add_jitter && backoff_ms > 0 {
            let jitter = rand::thread_rng().gen_range(0..=backoff_ms / 4);
            duration += Duration::from_millis(jitter);
        }
        duration
    }

    /// Decide whether `err` on `attempt` should be retried, sleeping through
    /// the backoff if so.
    pub(crate) async fn should_retry(
        &self,
        operation: &str,
        attempt: u32,
        err: &CourseError,
    ) -> bool {
        if !err.is_retryable() {
            return false;
        }
        if attempt >= self.max_retries {
            warn!(
                operation,
                attempt = attempt + 1,
                "Transaction conflict persisted after max retries"
            );
            return false;
        }

        let backoff = self.backoff_duration(attempt);
        warn!(
            operation,
            attempt = attempt + 1,
            backoff_ms = backoff.as_millis() as u64,
            "Transaction conflict, retrying after backoff"
        );
        record_transaction_retry(operation);
        sleep(backoff).await;
        true
    }

    pub(crate) fn log_recovered(operation: &str, attempt: u32) {
        if attempt > 0 {
            info!(
                operation,
                attempt = attempt + 1,
                "Transaction succeeded after retry"
            );
        }
    }
}

/// Evaluate a transactional store call, re-running it while it fails with a
/// retryable conflict and the retry budget lasts.
macro_rules! retry_transaction {
    ($config:expr, $operation:expr, $call:expr) => {{
        let mut attempt: u32 = 0;
        loop {
            match $call {
                Ok(value) => {
                    $crate::services::retry::RetryConfig::log_recovered($operation, attempt);
                    break Ok(value);
                }
                Err(err) => {
                    if $config.should_retry($operation, attempt, &err).await {
                        attempt += 1;
                        continue;
                    }
                    break Err(err);
                }
            }
        }
    }};
}

pub(crate) use retry_transaction;

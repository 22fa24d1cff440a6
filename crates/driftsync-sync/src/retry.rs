//! Retrying operation wrapper
//!
//! Wraps any fallible unit of work (upload, download, delete, remote list)
//! with bounded exponential-backoff retry. Only transient failures are
//! retried; permanent failures return after the first attempt. The wrapper
//! never retries indefinitely.
//!
//! With the default policy (3 attempts, 1s initial delay) the delay
//! sequence is exactly [1s, 2s, 4s] and the worst-case total delay is the
//! documented 7 seconds; no fourth attempt is ever issued. Both constants
//! are configuration, not literals, so tests inject millisecond-scale
//! delays.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use driftsync_core::config::RetryConfig;
use driftsync_core::ports::remote_store::RemoteStoreError;

// ============================================================================
// Classification
// ============================================================================

/// Errors that know whether they are worth retrying
pub trait Retryable {
    /// Returns true if a retry could plausibly succeed
    fn is_transient(&self) -> bool;
}

impl Retryable for RemoteStoreError {
    fn is_transient(&self) -> bool {
        RemoteStoreError::is_transient(self)
    }
}

// ============================================================================
// RetryPolicy
// ============================================================================

/// Bounded exponential-backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts per operation; no further attempt after the last
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles per attempt afterwards
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Builds a policy from the loaded configuration
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: config.initial_delay(),
        }
    }

    /// The delay slept after the failed attempt with the given zero-based
    /// index: `initial_delay * 2^attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.initial_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// The full delay sequence, one entry per attempt
    pub fn delay_sequence(&self) -> Vec<Duration> {
        (0..self.max_attempts.max(1))
            .map(|attempt| self.delay_for(attempt))
            .collect()
    }

    /// Worst-case total delay across all attempts
    pub fn total_delay(&self) -> Duration {
        self.delay_sequence().iter().sum()
    }
}

// ============================================================================
// with_retry
// ============================================================================

/// Executes an async operation with bounded exponential-backoff retry
///
/// Attempts the operation up to `policy.max_attempts` times. After each
/// transiently failed attempt the wrapper backs off `initial_delay *
/// 2^attempt`; a non-transient failure is returned immediately without
/// further attempts.
pub async fn with_retry<F, Fut, T, E>(
    operation_name: &str,
    policy: RetryPolicy,
    f: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt, "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => {
                if !err.is_transient() {
                    warn!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Permanent failure, not retrying"
                    );
                    return Err(err);
                }

                let delay = policy.delay_for(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, backing off"
                );
                tokio::time::sleep(delay).await;

                attempt += 1;
                if attempt >= attempts {
                    return Err(err);
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

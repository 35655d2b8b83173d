//! Retry policy and executor

use log::{debug, info, warn};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::backoff::BackoffCalculator;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Delay unit between attempts
    pub initial_delay: Duration,

    /// Maximum delay between attempts
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(3, Duration::from_millis(1000))
    }
}

impl RetryPolicy {
    /// Linear policy: the wait after attempt `n` is `delay * n`
    pub fn linear(max_attempts: u32, delay: Duration) -> Self {
        let max_attempts = max_attempts.max(1);
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay.saturating_mul(max_attempts),
        }
    }

    /// One attempt, no retries
    pub fn single_attempt() -> Self {
        Self::linear(1, Duration::ZERO)
    }

    /// Calculate delay after a specific failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        BackoffCalculator::linear(self.initial_delay, self.max_delay).calculate_delay(attempt)
    }
}

/// Trait for errors that can be retried
pub trait Retryable {
    /// Whether this error is retryable
    fn is_retryable(&self) -> bool;

    /// Custom retry delay for this error type
    fn retry_delay(&self) -> Option<Duration> {
        None
    }
}

/// Retry executor
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Execute a function with retry logic and attempt context
    pub async fn execute_with_context<F, Fut, T, E>(&self, mut f: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let mut attempt = 1;

        loop {
            debug!(
                "Executing attempt {} of {}",
                attempt, self.policy.max_attempts
            );

            match f(attempt).await {
                Ok(result) => {
                    if attempt > 1 {
                        info!("Operation succeeded after {} attempts", attempt);
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if !error.is_retryable() {
                        warn!("Operation failed with non-retryable error: {}", error);
                        return Err(RetryError::NonRetryableError(error));
                    }

                    if attempt >= self.policy.max_attempts {
                        warn!("Operation failed after {} attempts: {}", attempt, error);
                        return Err(RetryError::MaxAttemptsExceeded {
                            attempts: attempt,
                            last_error: error,
                        });
                    }

                    let delay = error
                        .retry_delay()
                        .unwrap_or_else(|| self.policy.delay_for_attempt(attempt));

                    warn!(
                        "Attempt {} failed: {}. Retrying in {:?}",
                        attempt, error, delay
                    );
                    sleep(delay).await;

                    attempt += 1;
                }
            }
        }
    }
}

/// Retry error types
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Maximum retry attempts exceeded
    #[error("Maximum retry attempts ({attempts}) exceeded. Last error: {last_error}")]
    MaxAttemptsExceeded { attempts: u32, last_error: E },

    /// Non-retryable error encountered
    #[error("Non-retryable error: {0}")]
    NonRetryableError(E),
}

impl<E> RetryError<E> {
    /// Get the underlying error
    pub fn into_inner(self) -> E {
        match self {
            RetryError::MaxAttemptsExceeded { last_error, .. } => last_error,
            RetryError::NonRetryableError(error) => error,
        }
    }

    /// Attempts made before giving up
    pub fn attempts(&self) -> Option<u32> {
        match self {
            RetryError::MaxAttemptsExceeded { attempts, .. } => Some(*attempts),
            RetryError::NonRetryableError(_) => None,
        }
    }
}

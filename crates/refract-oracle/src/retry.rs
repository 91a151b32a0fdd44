//! Retry with fixed backoff
//!
//! One policy type shared by every oracle call site: synthesis dispatch,
//! scoring and refinement all retry through [`RetryPolicy::run`].

use crate::error::OracleError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Bounded retry with a fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first (0 is treated as 1)
    pub max_attempts: u32,
    /// Delay between attempts
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Create new policy
    #[inline]
    #[must_use]
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Single attempt, no retry
    #[inline]
    #[must_use]
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Run an operation under this policy
    ///
    /// The closure receives the 1-based attempt number. Non-retryable
    /// errors are returned immediately; a retryable error on the final
    /// attempt is wrapped in [`OracleError::Exhausted`].
    ///
    /// # Errors
    /// Returns the first non-retryable error, or `Exhausted` once the
    /// attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, OracleError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, OracleError>>,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if attempt >= max => {
                    tracing::error!(label, attempts = attempt, error = %err, "all retries failed");
                    return Err(OracleError::Exhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    tracing::warn!(label, attempt, max, error = %err, "attempt failed, retrying");
                    if !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

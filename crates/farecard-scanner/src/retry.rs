//! Bounded retry and bounded polling primitives.
//!
//! Every browser interaction that can fail transiently runs through
//! [`RetryPolicy`]. A retried step always starts over from the beginning;
//! operations must be safe to re-issue in full.

use crate::error::{Result, ScrapeError};
use farecard_core::RetryConfig;
use std::future::Future;
use std::time::Duration;

/// Attempt budget and delay for one kind of step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Policy with `max_attempts` total attempts (at least one).
    #[must_use]
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Per-step policy from config.
    #[must_use]
    pub fn for_steps(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.delay())
    }

    /// Whole-login policy from config.
    #[must_use]
    pub fn for_authentication(config: &RetryConfig) -> Self {
        Self::new(config.auth_attempts, config.delay())
    }

    /// Total attempts allowed.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `operation` until it succeeds, fails terminally, or the budget
    /// runs out.
    ///
    /// Errors that are not retryable are returned as-is on first occurrence.
    /// Exhausting the budget yields [`ScrapeError::StepFailure`] carrying the
    /// last cause.
    pub async fn run<T, F, Fut>(&self, step: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::debug!(step, attempt, max = self.max_attempts, "running step");

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(
                            "{} succeeded on attempt {}/{}",
                            step,
                            attempt,
                            self.max_attempts
                        );
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}",
                        step,
                        attempt,
                        self.max_attempts,
                        err
                    );
                    if attempt >= self.max_attempts {
                        return Err(ScrapeError::StepFailure {
                            step: step.to_string(),
                            attempts: attempt,
                            source: Box::new(err),
                        });
                    }
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}

/// Run `operation` up to `max_attempts` times, sleeping `delay` between
/// failures.
pub async fn with_retry<T, F, Fut>(
    operation: F,
    max_attempts: u32,
    delay: Duration,
    step: &str,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    RetryPolicy::new(max_attempts, delay).run(step, operation).await
}

/// Evaluate `predicate` up to `max_attempts` times, `interval` apart, and
/// report whether it ever held.
pub async fn poll_until<F, Fut>(max_attempts: u32, interval: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for attempt in 1..=max_attempts.max(1) {
        if predicate().await {
            return true;
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }
    false
}

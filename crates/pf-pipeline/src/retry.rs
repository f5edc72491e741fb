//! Bounded retry around a single step execution.

use std::time::Duration;

use pf_core::{Config, Error, ImageState, Result, Scope, Step};

/// Fixed-delay retry for retryable step errors.
///
/// A step is attempted at most `max_retries + 1` times. Non-retryable errors
/// return immediately. Both the attempt itself and the delay between attempts
/// are preempted by the scope, in which case a cancellation error attributed
/// to the step is returned. A step that ignores the scope is abandoned when
/// it ends; its output is never accepted under a done scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_retries, config.retry_delay())
    }

    /// Run `step` against `state` under this policy.
    pub async fn run(&self, scope: &Scope, step: &dyn Step, state: &ImageState) -> Result<ImageState> {
        let mut attempt = 0u32;
        loop {
            let attempt_result = tokio::select! {
                biased;
                _ = scope.done() => return Err(Error::cancelled(step.name(), scope)),
                result = step.execute(scope, state) => result,
            };
            let err = match attempt_result {
                Ok(next) => return Ok(next),
                Err(err) => err,
            };
            if !err.is_retryable() || attempt >= self.max_retries {
                return Err(err);
            }
            attempt += 1;
            tracing::debug!(
                step = step.name(),
                attempt,
                max_retries = self.max_retries,
                error = %err,
                "retrying step"
            );

            tokio::select! {
                biased;
                _ = scope.done() => return Err(Error::cancelled(step.name(), scope)),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
    }
}

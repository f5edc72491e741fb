//! Execution scope: cancellation plus an optional deadline.
//!
//! Every public operation takes a [`Scope`]. Child scopes inherit the
//! parent's cancellation and can only tighten its deadline, so a job-level
//! timeout derived at dequeue time behaves exactly like external
//! cancellation.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, ErrorKind, Result};

/// Cancellable execution scope with an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Scope {
    /// A fresh root scope with no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Child scope: cancelled when `self` is, but cancelling the child does
    /// not affect the parent.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Child scope whose deadline is the earlier of the parent's and
    /// `now + timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Child scope whose deadline is the earlier of the parent's and `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Underlying token, for integration with other tokio-util consumers.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Reason the scope is done, if it is.
    pub fn reason(&self) -> Option<ErrorKind> {
        if self.token.is_cancelled() {
            Some(ErrorKind::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(ErrorKind::DeadlineExceeded)
        } else {
            None
        }
    }

    pub fn is_done(&self) -> bool {
        self.reason().is_some()
    }

    /// `Ok(())` while the scope is live, otherwise a pipeline error attributed
    /// to `op`.
    pub fn check(&self, op: &str) -> Result<()> {
        match self.reason() {
            None => Ok(()),
            Some(kind) => Err(Error::pipeline(op, kind)),
        }
    }

    /// Resolve once the scope is cancelled or its deadline passes, yielding
    /// the reason.
    pub async fn done(&self) -> ErrorKind {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => ErrorKind::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => ErrorKind::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ErrorKind::Cancelled
            }
        }
    }
}

//! The [`Step`] and [`Hook`] capabilities.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::scope::Scope;
use crate::state::ImageState;

/// A named, stateless transform from one [`ImageState`] to another.
///
/// Implementations must be safe to invoke concurrently and must never mutate
/// the input state; they return a new state built from a shallow clone.
#[async_trait]
pub trait Step: Send + Sync {
    /// Name used for hooks, timings, and error attribution.
    fn name(&self) -> &str;

    async fn execute(&self, scope: &Scope, state: &ImageState) -> Result<ImageState>;
}

/// Shared, type-erased step.
pub type StepRef = Arc<dyn Step>;

/// Observer invoked around every step the runner executes.
///
/// Both methods default to no-ops so a hook only overrides what it needs.
#[async_trait]
pub trait Hook: Send + Sync {
    async fn before_step(&self, _scope: &Scope, _step: &str, _state: &ImageState) {}

    /// `state` is the step's output on success and `None` on failure.
    async fn after_step(
        &self,
        _scope: &Scope,
        _step: &str,
        _state: Option<&ImageState>,
        _elapsed: Duration,
        _error: Option<&Error>,
    ) {
    }
}

//! Pipeline runner: executes an ordered step list against one state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use pf_core::{Hook, ImageState, Result, Scope, StepRef};

use crate::retry::RetryPolicy;

/// Final state plus per-step timings of one pipeline invocation.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub state: ImageState,
    /// Wall time per step name; repeated names accumulate.
    pub timings: HashMap<String, Duration>,
}

/// Runs steps strictly in order with retry and hook notification.
///
/// Hooks can be added while pipelines are running; each invocation works on
/// a snapshot of the hook list taken when it starts.
#[derive(Clone, Default)]
pub struct PipelineRunner {
    hooks: Arc<RwLock<Vec<Arc<dyn Hook>>>>,
    retry: RetryPolicy,
}

impl PipelineRunner {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            hooks: Arc::default(),
            retry,
        }
    }

    /// Builder: register a hook.
    pub fn with_hook(self, hook: Arc<dyn Hook>) -> Self {
        self.add_hook(hook);
        self
    }

    /// Register a hook. Hooks fire in registration order.
    pub fn add_hook(&self, hook: Arc<dyn Hook>) {
        self.hooks.write().push(hook);
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Execute `steps` against `state`.
    ///
    /// The scope is checked before every step; an interrupted run fails with
    /// a pipeline error naming the step that would have run next. The first
    /// step failure aborts the run.
    pub async fn run(&self, scope: &Scope, state: ImageState, steps: &[StepRef]) -> Result<RunOutput> {
        let hooks = self.hooks.read().clone();
        let mut timings: HashMap<String, Duration> = HashMap::with_capacity(steps.len());
        let mut current = state;

        for step in steps {
            let name = step.name();
            scope.check(name)?;

            for hook in &hooks {
                hook.before_step(scope, name, &current).await;
            }

            let started = Instant::now();
            let result = self.retry.run(scope, step.as_ref(), &current).await;
            let elapsed = started.elapsed();
            *timings.entry(name.to_string()).or_default() += elapsed;

            for hook in &hooks {
                hook.after_step(scope, name, result.as_ref().ok(), elapsed, result.as_ref().err())
                    .await;
            }

            // The previous state drops here, releasing any handle that no
            // other state still references.
            current = result?;
        }

        Ok(RunOutput {
            state: current,
            timings,
        })
    }
}

impl std::fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("hooks", &self.hook_count())
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pf_core::{Error, ErrorKind, Step};
    use std::sync::atomic::{AtomicUsize, Ordering};

    // -- Fake steps -----------------------------------------------------------

    struct Counting {
        name: &'static str,
        executed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Step for Counting {
        fn name(&self) -> &str {
            self.name
        }
        async fn execute(&self, _scope: &Scope, state: &ImageState) -> Result<ImageState> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            Ok(state.clone().map_metadata(|m| m.width += 1))
        }
    }

    struct Failing;

    #[async_trait]
    impl Step for Failing {
        fn name(&self) -> &str {
            "boom"
        }
        async fn execute(&self, _scope: &Scope, _state: &ImageState) -> Result<ImageState> {
            Err(Error::pipeline("boom", ErrorKind::msg("intentional failure")))
        }
    }

    /// Records "before:<step>" / "after:<step>:<ok|err>" events.
    struct Recorder {
        tag: &'static str,
        events: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Hook for Recorder {
        async fn before_step(&self, _scope: &Scope, step: &str, _state: &ImageState) {
            self.events.lock().push(format!("{}:before:{step}", self.tag));
        }

        async fn after_step(
            &self,
            _scope: &Scope,
            step: &str,
            state: Option<&ImageState>,
            _elapsed: Duration,
            error: Option<&Error>,
        ) {
            let outcome = match (state, error) {
                (Some(_), None) => "ok",
                (None, Some(_)) => "err",
                _ => "invalid",
            };
            self.events.lock().push(format!("{}:after:{step}:{outcome}", self.tag));
        }
    }

    fn counting(name: &'static str, counter: &Arc<AtomicUsize>) -> StepRef {
        Arc::new(Counting {
            name,
            executed: counter.clone(),
        })
    }

    // -- Tests ----------------------------------------------------------------

    #[tokio::test]
    async fn runs_steps_in_order() {
        let counter = Arc::new(AtomicUsize::new(0));
        let steps = vec![counting("a", &counter), counting("b", &counter)];
        let out = PipelineRunner::new(RetryPolicy::none())
            .run(&Scope::new(), ImageState::default(), &steps)
            .await
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(out.state.metadata().width, 2);
        assert!(out.timings.contains_key("a"));
        assert!(out.timings.contains_key("b"));
    }

    #[tokio::test]
    async fn repeated_step_names_share_a_timing_entry() {
        let counter = Arc::new(AtomicUsize::new(0));
        let steps = vec![counting("same", &counter), counting("same", &counter)];
        let out = PipelineRunner::default()
            .run(&Scope::new(), ImageState::default(), &steps)
            .await
            .unwrap();
        assert_eq!(out.timings.len(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_aborts_remaining_steps() {
        let counter = Arc::new(AtomicUsize::new(0));
        let steps: Vec<StepRef> = vec![counting("a", &counter), Arc::new(Failing), counting("c", &counter)];
        let err = PipelineRunner::new(RetryPolicy::none())
            .run(&Scope::new(), ImageState::default(), &steps)
            .await
            .unwrap_err();
        assert_eq!(err.op(), "boom");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_scope_names_next_step() {
        let counter = Arc::new(AtomicUsize::new(0));
        let scope = Scope::new();
        scope.cancel();
        let steps = vec![counting("resize", &counter)];
        let err = PipelineRunner::default()
            .run(&scope, ImageState::default(), &steps)
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
        assert!(err.is_category(pf_core::Category::Pipeline));
        assert_eq!(err.op(), "resize");
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn hooks_fire_in_registration_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let runner = PipelineRunner::new(RetryPolicy::none())
            .with_hook(Arc::new(Recorder {
                tag: "first",
                events: events.clone(),
            }))
            .with_hook(Arc::new(Recorder {
                tag: "second",
                events: events.clone(),
            }));

        let counter = Arc::new(AtomicUsize::new(0));
        let steps: Vec<StepRef> = vec![counting("a", &counter), Arc::new(Failing)];
        let _ = runner.run(&Scope::new(), ImageState::default(), &steps).await;

        assert_eq!(
            *events.lock(),
            vec![
                "first:before:a",
                "second:before:a",
                "first:after:a:ok",
                "second:after:a:ok",
                "first:before:boom",
                "second:before:boom",
                "first:after:boom:err",
                "second:after:boom:err",
            ]
        );
    }

    #[tokio::test]
    async fn input_state_is_not_mutated() {
        let counter = Arc::new(AtomicUsize::new(0));
        let input = ImageState::default();
        let steps = vec![counting("a", &counter)];
        let out = PipelineRunner::default()
            .run(&Scope::new(), input.clone(), &steps)
            .await
            .unwrap();
        assert_eq!(input.metadata().width, 0);
        assert_eq!(out.state.metadata().width, 1);
    }
}

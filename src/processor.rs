//! The processor: synchronous, batch and multi-variant processing, plus the
//! asynchronous job queue served by the worker pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use pf_codec::{resolve_format, BufferPool, Ingestor, Registry};
use pf_core::{
    Config, EncodeOptions, Error, ErrorKind, Hook, ImageState, JobId, Result, Scope, Source, StepRef,
};
use pf_pipeline::{
    AdaptiveCompressStep, AdaptiveTarget, DecodeStep, EncodeStep, PipelineRunner, RetryPolicy, RunOutput,
};
use tokio::task::JoinSet;

use crate::job::Job;
use crate::worker::{PoolSettings, WorkerPool};

/// Output of a processing call.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub primary: ImageState,
    /// Variant outputs by name; empty unless variants were requested.
    pub variants: HashMap<String, ImageState>,
    pub duration: Duration,
    /// Wall time per step name. Variant steps are keyed `variant/step`.
    pub step_timings: HashMap<String, Duration>,
}

/// A named alternate output derived from a shared base state.
#[derive(Clone)]
pub struct VariantDefinition {
    pub name: String,
    pub steps: Vec<StepRef>,
}

impl VariantDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<StepRef>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }
}

impl std::fmt::Debug for VariantDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariantDefinition")
            .field("name", &self.name)
            .field("steps", &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// Snapshot of the processor's outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub processed: u64,
    pub errors: u64,
}

struct Inner {
    config: Config,
    registry: Arc<Registry>,
    runner: PipelineRunner,
    ingestor: Ingestor,
    pool: WorkerPool,
    processed: AtomicU64,
    errors: AtomicU64,
}

/// Entry point for all image processing.
///
/// Cheap to clone; clones share the registry, hooks, counters and worker
/// pool. Safe to call from many tasks at once.
#[derive(Clone)]
pub struct Processor {
    inner: Arc<Inner>,
}

/// Non-owning handle held by worker tasks.
#[derive(Clone)]
pub(crate) struct WeakProcessor(Weak<Inner>);

impl WeakProcessor {
    pub(crate) fn upgrade(&self) -> Option<Processor> {
        self.0.upgrade().map(|inner| Processor { inner })
    }
}

impl Processor {
    /// Validate `config` and build a processor around `registry`.
    pub fn new(config: Config, registry: Arc<Registry>) -> Result<Self> {
        config.validate()?;

        let pool = Arc::new(BufferPool::new(config.chunk_size));
        let ingestor = Ingestor::new(pool, config.max_image_bytes());
        let runner = PipelineRunner::new(RetryPolicy::from_config(&config));
        let workers = WorkerPool::new(PoolSettings {
            capacity: config.queue_capacity,
            shutdown_grace: config.shutdown_grace(),
            delivery_timeout: config.result_delivery_timeout(),
        });

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                registry,
                runner,
                ingestor,
                pool: workers,
                processed: AtomicU64::new(0),
                errors: AtomicU64::new(0),
            }),
        })
    }

    /// Processor with the raster codecs registered for jpeg, png and webp.
    pub fn with_default_codecs(config: Config) -> Result<Self> {
        let registry = Arc::new(Registry::with_defaults(config.default_quality));
        Self::new(config, registry)
    }

    pub(crate) fn downgrade(&self) -> WeakProcessor {
        WeakProcessor(Arc::downgrade(&self.inner))
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    /// Register a hook for every subsequent pipeline run.
    pub fn add_hook(&self, hook: Arc<dyn Hook>) {
        self.inner.runner.add_hook(hook);
    }

    // -- Step helpers ---------------------------------------------------------

    /// A decode step bound to this processor's registry.
    pub fn decode_step(&self) -> StepRef {
        Arc::new(DecodeStep::new(self.inner.registry.clone()))
    }

    /// An encode step bound to this processor's registry. Unset quality falls
    /// back to the configured default.
    pub fn encode_step(&self, mut options: EncodeOptions) -> StepRef {
        options.quality = options.quality_or(self.inner.config.default_quality);
        Arc::new(EncodeStep::new(self.inner.registry.clone(), options))
    }

    /// An adaptive compression step using the configured quality bounds.
    pub fn adaptive_step(&self, target: AdaptiveTarget) -> StepRef {
        let adaptive = &self.inner.config.adaptive;
        Arc::new(AdaptiveCompressStep::new(
            self.inner.registry.clone(),
            target,
            adaptive.min_quality,
            adaptive.max_quality,
            adaptive.step_size,
        ))
    }

    // -- Synchronous processing -----------------------------------------------

    /// Ingest `source` and run `steps` against it.
    ///
    /// Fails on the first error; there is no partial result.
    pub async fn process(&self, scope: &Scope, source: Source, steps: &[StepRef]) -> Result<ProcessingResult> {
        let result = self.execute(scope, source, steps).await;
        self.record(&result);
        result
    }

    /// Run `process` for every source concurrently.
    ///
    /// The output is positionally aligned with `sources`. A failing source
    /// does not affect the others.
    pub async fn batch(&self, scope: &Scope, sources: Vec<Source>, steps: &[StepRef]) -> Vec<Result<ProcessingResult>> {
        let steps: Arc<[StepRef]> = Arc::from(steps);
        let mut slots: Vec<Option<Result<ProcessingResult>>> = Vec::with_capacity(sources.len());
        slots.resize_with(sources.len(), || None);

        let mut branches = JoinSet::new();
        for (index, source) in sources.into_iter().enumerate() {
            let processor = self.clone();
            let scope = scope.clone();
            let steps = steps.clone();
            branches.spawn(async move { (index, processor.process(&scope, source, &steps).await) });
        }

        while let Some(joined) = branches.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => tracing::error!(error = %e, "batch branch failed to complete"),
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| Err(Error::pipeline("batch", ErrorKind::msg("branch did not complete"))))
            })
            .collect()
    }

    /// Run `base_steps`, then every variant concurrently on its own shallow
    /// copy of the base result.
    ///
    /// If any variant fails the call fails with one of the branch errors.
    /// Which one is unspecified. Remaining branches still run to completion.
    pub async fn process_variants(
        &self,
        scope: &Scope,
        source: Source,
        base_steps: &[StepRef],
        variants: &[VariantDefinition],
    ) -> Result<ProcessingResult> {
        let result = self.execute_variants(scope, source, base_steps, variants).await;
        self.record(&result);
        result
    }

    async fn execute_variants(
        &self,
        scope: &Scope,
        source: Source,
        base_steps: &[StepRef],
        variants: &[VariantDefinition],
    ) -> Result<ProcessingResult> {
        let started = Instant::now();
        let mut base = self.execute(scope, source, base_steps).await?;

        let mut branches = JoinSet::new();
        for variant in variants {
            let runner = self.inner.runner.clone();
            let scope = scope.clone();
            let state = base.primary.clone();
            let VariantDefinition { name, steps } = variant.clone();
            branches.spawn(async move {
                let output = if steps.is_empty() {
                    Ok(RunOutput {
                        state,
                        timings: HashMap::new(),
                    })
                } else {
                    runner.run(&scope, state, &steps).await
                };
                (name, output)
            });
        }

        let mut first_error = None;
        while let Some(joined) = branches.join_next().await {
            let (name, output) = match joined {
                Ok(branch) => branch,
                Err(e) => {
                    let err = Error::pipeline("variant", ErrorKind::msg(format!("variant branch failed: {e}")));
                    first_error.get_or_insert(err);
                    continue;
                }
            };
            match output {
                Ok(RunOutput { state, timings }) => {
                    for (step, elapsed) in timings {
                        base.step_timings.insert(format!("{name}/{step}"), elapsed);
                    }
                    base.variants.insert(name, state);
                }
                Err(err) => {
                    tracing::debug!(variant = %name, error = %err, "variant failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        base.duration = started.elapsed();
        Ok(base)
    }

    /// Uncounted core of `process`.
    async fn execute(&self, scope: &Scope, source: Source, steps: &[StepRef]) -> Result<ProcessingResult> {
        let started = Instant::now();
        let Some(first) = steps.first() else {
            return Err(Error::input("process", ErrorKind::EmptyInput));
        };
        scope.check(first.name())?;

        let (mut reader, hints) = source.into_parts();
        let bytes = self.inner.ingestor.drain(scope, &mut reader, hints.size).await?;
        drop(reader);

        let format = resolve_format(&bytes, hints.content_type.as_deref());
        tracing::debug!(
            source = hints.name.as_deref().unwrap_or("<anonymous>"),
            %format,
            bytes = bytes.len(),
            steps = steps.len(),
            "processing"
        );

        let state = ImageState::from_encoded(bytes, format);
        let RunOutput { state, timings } = self.inner.runner.run(scope, state, steps).await?;
        Ok(ProcessingResult {
            primary: state,
            variants: HashMap::new(),
            duration: started.elapsed(),
            step_timings: timings,
        })
    }

    fn record<T>(&self, result: &Result<T>) {
        match result {
            Ok(_) => {
                self.inner.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.inner.errors.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(error = %err, "processing failed");
            }
        }
    }

    // -- Asynchronous jobs ----------------------------------------------------

    /// Queue `job` without waiting. Fails at once with a worker-pool-full
    /// error when the queue is at capacity, or a shut-down error after
    /// [`stop`](Self::stop).
    pub fn submit(&self, job: Job) -> Result<JobId> {
        self.inner.pool.submit(job)
    }

    /// Start the configured number of workers. Only the first call has an
    /// effect. Must be called from within a tokio runtime.
    pub fn start(&self) {
        self.inner.pool.start(self, self.inner.config.workers());
    }

    /// Drain the queue within the shutdown grace period and wait for every
    /// worker to exit. Idempotent.
    pub async fn stop(&self) {
        self.inner.pool.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.inner.pool.is_running()
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            processed: self.inner.processed.load(Ordering::Relaxed),
            errors: self.inner.errors.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("registry", &self.inner.registry)
            .field("runner", &self.inner.runner)
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pf_core::Category;

    fn processor() -> Processor {
        Processor::with_default_codecs(Config::default()).unwrap()
    }

    #[test]
    fn invalid_config_rejected() {
        let config = Config {
            chunk_size: 0,
            ..Config::default()
        };
        let err = Processor::with_default_codecs(config).unwrap_err();
        assert_eq!(err.category(), Category::Config);
    }

    #[tokio::test]
    async fn empty_step_list_is_an_input_error() {
        let p = processor();
        let err = p
            .process(&Scope::new(), Source::from_bytes(vec![1u8, 2, 3]), &[])
            .await
            .unwrap_err();
        assert_eq!(err.category(), Category::Input);
        assert_matches!(err.kind(), ErrorKind::EmptyInput);
        assert_eq!(p.stats(), ProcessorStats { processed: 0, errors: 1 });
    }

    #[tokio::test]
    async fn step_helpers_bind_registry() {
        let p = processor();
        let step = p.encode_step(EncodeOptions::default());
        assert_eq!(step.name(), "encode");
        assert_eq!(p.decode_step().name(), "decode");
        assert_eq!(p.adaptive_step(AdaptiveTarget::Bytes(10)).name(), "adaptive_compress");
    }

    #[tokio::test]
    async fn lifecycle_is_idempotent() {
        let p = processor();
        assert!(!p.is_running());
        p.start();
        p.start();
        assert!(p.is_running());
        p.stop().await;
        p.stop().await;
        assert!(!p.is_running());
        p.start();
        assert!(!p.is_running());
    }

    #[tokio::test]
    async fn dropping_a_started_processor_releases_it() {
        let p = processor();
        p.start();
        let weak = p.downgrade();
        tokio::task::yield_now().await;

        drop(p);
        assert!(weak.upgrade().is_none());
    }
}

//! Built-in hooks: structured step logging and in-memory metrics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use pf_core::{Error, Hook, ImageState, Scope};

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Emits a `tracing` event before and after every step.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHook;

#[async_trait]
impl Hook for LoggingHook {
    async fn before_step(&self, _scope: &Scope, step: &str, state: &ImageState) {
        let (width, height) = state.dimensions();
        tracing::debug!(step, format = %state.format(), width, height, "step started");
    }

    async fn after_step(
        &self,
        _scope: &Scope,
        step: &str,
        state: Option<&ImageState>,
        elapsed: Duration,
        error: Option<&Error>,
    ) {
        let duration_ms = elapsed.as_millis() as u64;
        if let Some(err) = error {
            tracing::error!(step, duration_ms, error = %err, "step failed");
            return;
        }
        match state {
            Some(state) => {
                let (width, height) = state.dimensions();
                tracing::debug!(
                    step,
                    duration_ms,
                    width,
                    height,
                    format = %state.format(),
                    size_bytes = state.metadata().size_bytes,
                    "step finished"
                );
            }
            None => tracing::debug!(step, duration_ms, "step finished"),
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Sink for per-step measurements.
pub trait MetricsCollector: Send + Sync {
    fn record_step(&self, step: &str, elapsed: Duration);
    fn record_error(&self, step: &str, error: &Error);
    /// Bytes produced by a step's encoded output.
    fn record_throughput(&self, bytes: u64);
}

/// Point-in-time copy of [`InMemoryMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub step_calls: HashMap<String, u64>,
    pub step_durations: HashMap<String, Duration>,
    pub step_errors: HashMap<String, u64>,
    pub throughput_bytes: u64,
}

impl MetricsSnapshot {
    /// Mean duration of a step, if it ran at all.
    pub fn mean_duration(&self, step: &str) -> Option<Duration> {
        let calls = *self.step_calls.get(step)?;
        let total = *self.step_durations.get(step)?;
        (calls > 0).then(|| total / calls as u32)
    }
}

#[derive(Debug, Default)]
struct StepTable {
    calls: HashMap<String, u64>,
    durations: HashMap<String, Duration>,
    errors: HashMap<String, u64>,
}

/// Thread-safe in-process metrics store.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    table: RwLock<StepTable>,
    throughput: AtomicU64,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let table = self.table.read();
        MetricsSnapshot {
            step_calls: table.calls.clone(),
            step_durations: table.durations.clone(),
            step_errors: table.errors.clone(),
            throughput_bytes: self.throughput.load(Ordering::Relaxed),
        }
    }
}

impl MetricsCollector for InMemoryMetrics {
    fn record_step(&self, step: &str, elapsed: Duration) {
        let mut table = self.table.write();
        *table.calls.entry(step.to_string()).or_default() += 1;
        *table.durations.entry(step.to_string()).or_default() += elapsed;
    }

    fn record_error(&self, step: &str, _error: &Error) {
        *self.table.write().errors.entry(step.to_string()).or_default() += 1;
    }

    fn record_throughput(&self, bytes: u64) {
        self.throughput.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// Feeds step timings, errors and output sizes into a [`MetricsCollector`].
#[derive(Clone)]
pub struct MetricsHook {
    collector: Arc<dyn MetricsCollector>,
}

impl MetricsHook {
    pub fn new(collector: Arc<dyn MetricsCollector>) -> Self {
        Self { collector }
    }
}

#[async_trait]
impl Hook for MetricsHook {
    async fn after_step(
        &self,
        _scope: &Scope,
        step: &str,
        state: Option<&ImageState>,
        elapsed: Duration,
        error: Option<&Error>,
    ) {
        self.collector.record_step(step, elapsed);
        if let Some(err) = error {
            self.collector.record_error(step, err);
        }
        if let Some(bytes) = state.and_then(|s| s.encoded()) {
            self.collector.record_throughput(bytes.len() as u64);
        }
    }
}

//! Asynchronous jobs submitted to the processor's worker pool.

use std::fmt;
use std::time::Duration;

use pf_core::{Error, JobId, Result, Scope, Source, StepRef};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::processor::{ProcessingResult, VariantDefinition};

/// A unit of work for the worker pool.
///
/// A job with variants runs [`Processor::process_variants`] with its steps as
/// the base pipeline; otherwise it runs [`Processor::process`].
///
/// [`Processor::process`]: crate::Processor::process
/// [`Processor::process_variants`]: crate::Processor::process_variants
pub struct Job {
    pub(crate) id: JobId,
    pub(crate) source: Source,
    pub(crate) steps: Vec<StepRef>,
    pub(crate) variants: Vec<VariantDefinition>,
    pub(crate) scope: Scope,
    pub(crate) timeout: Option<Duration>,
    pub(crate) result_tx: Option<mpsc::Sender<JobResult>>,
}

impl Job {
    pub fn new(source: Source, steps: Vec<StepRef>) -> Self {
        Self {
            id: JobId::new(),
            source,
            steps,
            variants: Vec::new(),
            scope: Scope::new(),
            timeout: None,
            result_tx: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Builder: use a caller-chosen id.
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    /// Builder: run under (a child of) `scope`, so the caller can cancel the
    /// job while it is queued or running.
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Builder: override the configured job timeout. `Duration::ZERO`
    /// disables the timeout for this job.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builder: deliver the outcome to `tx`.
    pub fn with_result_channel(mut self, tx: mpsc::Sender<JobResult>) -> Self {
        self.result_tx = Some(tx);
        self
    }

    /// Builder: derive named variants from the result of the job's steps.
    pub fn with_variants(mut self, variants: Vec<VariantDefinition>) -> Self {
        self.variants = variants;
        self
    }

    /// The timeout to apply at dequeue time, given the configured default.
    pub(crate) fn effective_timeout(&self, default: Option<Duration>) -> Option<Duration> {
        self.timeout.or(default).filter(|t| !t.is_zero())
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("steps", &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("variants", &self.variants.len())
            .field("timeout", &self.timeout)
            .field("has_result_channel", &self.result_tx.is_some())
            .finish()
    }
}

/// Result destination for a single job. One slot is enough: the worker waits
/// a bounded time for it to drain before dropping the result.
pub fn result_channel() -> (mpsc::Sender<JobResult>, mpsc::Receiver<JobResult>) {
    mpsc::channel(1)
}

/// Terminal state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    Failed,
    /// The job's own deadline expired.
    TimedOut,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    pub(crate) fn of(result: &Result<ProcessingResult>) -> Self {
        match result {
            Ok(_) => Self::Completed,
            Err(err) if matches!(err.kind(), pf_core::ErrorKind::DeadlineExceeded) => Self::TimedOut,
            Err(_) => Self::Failed,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome delivered to a job's result channel.
#[derive(Debug)]
pub struct JobResult {
    pub job_id: JobId,
    pub status: JobStatus,
    pub result: Result<ProcessingResult>,
}

impl JobResult {
    pub(crate) fn new(job_id: JobId, result: Result<ProcessingResult>) -> Self {
        Self {
            job_id,
            status: JobStatus::of(&result),
            result,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }

    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }
}

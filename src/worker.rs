//! Bounded job queue and the worker tasks that drain it.
//!
//! Submission never blocks: a full queue is reported to the caller at once.
//! Shutdown is a graceful drain bounded by a grace period. Jobs dequeued
//! while draining run under a deadline clamped to the end of the grace
//! period. When it ends, jobs still running are abandoned and jobs still
//! queued are answered with a `Failed` result carrying a shut-down error.
//!
//! Workers hold only a weak reference to the processor. Dropping the last
//! processor handle without calling `stop` drops the pool, which aborts the
//! workers.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pf_core::{Error, ErrorKind, JobId, Result};
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::job::{Job, JobResult};
use crate::processor::{Processor, WeakProcessor};

const OP: &str = "worker_pool";

enum Lifecycle {
    Idle,
    Running {
        workers: JoinSet<()>,
        halt: CancellationToken,
    },
    /// `done` is cancelled once the stop that got here has finished.
    Stopped { done: CancellationToken },
}

/// Settings the pool needs at shutdown and delivery time.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PoolSettings {
    pub capacity: usize,
    pub shutdown_grace: Duration,
    pub delivery_timeout: Duration,
}

pub(crate) struct WorkerPool {
    settings: PoolSettings,
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    lifecycle: Mutex<Lifecycle>,
    /// Set once shutdown begins; every job dequeued afterwards is clamped to it.
    drain_deadline: Arc<Mutex<Option<Instant>>>,
}

impl WorkerPool {
    pub fn new(settings: PoolSettings) -> Self {
        let (tx, rx) = mpsc::channel(settings.capacity);
        Self {
            settings,
            tx: Mutex::new(Some(tx)),
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            lifecycle: Mutex::new(Lifecycle::Idle),
            drain_deadline: Arc::default(),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running { .. })
    }

    /// Enqueue without waiting.
    pub fn submit(&self, job: Job) -> Result<JobId> {
        let id = job.id;
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(Error::pipeline(OP, ErrorKind::ShutDown));
        };
        match tx.try_send(job) {
            Ok(()) => {
                tracing::debug!(job_id = %id, "job queued");
                Ok(id)
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(job_id = %id, capacity = self.settings.capacity, "job queue full");
                Err(Error::pipeline(OP, ErrorKind::WorkerPoolFull))
            }
            Err(TrySendError::Closed(_)) => Err(Error::pipeline(OP, ErrorKind::ShutDown)),
        }
    }

    /// Spawn `count` workers on the first call; later calls do nothing.
    pub fn start(&self, processor: &Processor, count: usize) {
        let mut lifecycle = self.lifecycle.lock();
        if !matches!(*lifecycle, Lifecycle::Idle) {
            return;
        }

        let halt = CancellationToken::new();
        let mut workers = JoinSet::new();
        for worker in 0..count {
            let ctx = WorkerContext {
                worker,
                processor: processor.downgrade(),
                rx: self.rx.clone(),
                halt: halt.clone(),
                drain_deadline: self.drain_deadline.clone(),
                delivery_timeout: self.settings.delivery_timeout,
            };
            workers.spawn(ctx.run());
        }
        tracing::info!(workers = count, capacity = self.settings.capacity, "worker pool started");
        *lifecycle = Lifecycle::Running { workers, halt };
    }

    /// Close the queue, let workers drain it for up to the grace period, then
    /// halt them and answer whatever is left. Idempotent; a call made while
    /// another stop is in progress waits for that one to finish.
    pub async fn stop(&self) {
        let done = CancellationToken::new();
        let previous = {
            let mut lifecycle = self.lifecycle.lock();
            match &*lifecycle {
                Lifecycle::Stopped { done: in_progress } => Err(in_progress.clone()),
                _ => Ok(std::mem::replace(
                    &mut *lifecycle,
                    Lifecycle::Stopped { done: done.clone() },
                )),
            }
        };
        let previous = match previous {
            Ok(previous) => previous,
            Err(in_progress) => {
                in_progress.cancelled().await;
                return;
            }
        };
        // Waiters are released even if this call is itself dropped mid-drain.
        let _release_waiters = done.drop_guard();
        // Dropping the only sender lets `recv` return `None` once the queue is empty.
        self.tx.lock().take();

        match previous {
            Lifecycle::Stopped { .. } | Lifecycle::Idle => {}
            Lifecycle::Running { mut workers, halt } => {
                let grace_end = Instant::now() + self.settings.shutdown_grace;
                *self.drain_deadline.lock() = Some(grace_end);
                tracing::info!(
                    grace_ms = self.settings.shutdown_grace.as_millis() as u64,
                    "worker pool draining"
                );

                let drained = tokio::time::timeout_at(grace_end, join_all(&mut workers)).await;
                if drained.is_err() {
                    tracing::warn!("grace period over, halting workers");
                    halt.cancel();
                    join_all(&mut workers).await;
                }
            }
        }

        let rejected = self.reject_queued().await;
        tracing::info!(rejected, "worker pool stopped");
    }

    async fn reject_queued(&self) -> usize {
        let mut rx = self.rx.lock().await;
        let mut rejected = 0;
        while let Ok(job) = rx.try_recv() {
            rejected += 1;
            let result = JobResult::new(job.id, Err(Error::pipeline(OP, ErrorKind::ShutDown)));
            deliver(job.result_tx, result, self.settings.delivery_timeout).await;
        }
        rejected
    }
}

async fn join_all(workers: &mut JoinSet<()>) {
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "worker task failed");
        }
    }
}

struct WorkerContext {
    worker: usize,
    processor: WeakProcessor,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    halt: CancellationToken,
    drain_deadline: Arc<Mutex<Option<Instant>>>,
    delivery_timeout: Duration,
}

impl WorkerContext {
    async fn run(self) {
        tracing::debug!(worker = self.worker, "worker started");
        while let Some(job) = self.next_job().await {
            let Some(processor) = self.processor.upgrade() else {
                let result = JobResult::new(job.id, Err(Error::pipeline(OP, ErrorKind::ShutDown)));
                deliver(job.result_tx, result, self.delivery_timeout).await;
                break;
            };
            self.run_job(&processor, job).await;
        }
        tracing::debug!(worker = self.worker, "worker stopped");
    }

    /// The next job, or `None` when halted or the queue is closed and empty.
    async fn next_job(&self) -> Option<Job> {
        let mut rx = tokio::select! {
            biased;
            _ = self.halt.cancelled() => return None,
            guard = self.rx.lock() => guard,
        };
        tokio::select! {
            biased;
            _ = self.halt.cancelled() => None,
            job = rx.recv() => job,
        }
    }

    async fn run_job(&self, processor: &Processor, job: Job) {
        let timeout = job.effective_timeout(processor.config().job_timeout());
        let Job {
            id,
            source,
            steps,
            variants,
            scope,
            result_tx,
            ..
        } = job;

        let mut scope = scope.child();
        if let Some(timeout) = timeout {
            scope = scope.with_timeout(timeout);
        }
        let drain_deadline = *self.drain_deadline.lock();
        if let Some(deadline) = drain_deadline {
            scope = scope.with_deadline(deadline);
        }

        tracing::debug!(worker = self.worker, job_id = %id, source = source.display_name(), "job started");
        let work = async {
            if variants.is_empty() {
                processor.process(&scope, source, &steps).await
            } else {
                processor
                    .process_variants(&scope, source, &steps, &variants)
                    .await
            }
        };
        // A job still running when the grace period ends is abandoned.
        let result = tokio::select! {
            biased;
            _ = self.halt.cancelled() => Err(Error::pipeline(OP, ErrorKind::ShutDown)),
            result = work => result,
        };

        let result = JobResult::new(id, result);
        match result.error() {
            None => tracing::info!(worker = self.worker, job_id = %id, "job completed"),
            Some(err) => {
                tracing::warn!(worker = self.worker, job_id = %id, status = %result.status, error = %err, "job failed")
            }
        }
        deliver(result_tx, result, self.delivery_timeout).await;
    }
}

/// Hand `result` to its destination, waiting at most `wait` for room.
async fn deliver(tx: Option<mpsc::Sender<JobResult>>, result: JobResult, wait: Duration) {
    let Some(tx) = tx else {
        return;
    };
    let job_id = result.job_id;
    match tx.send_timeout(result, wait).await {
        Ok(()) => {}
        Err(SendTimeoutError::Timeout(_)) => {
            tracing::warn!(job_id = %job_id, wait_ms = wait.as_millis() as u64, "result destination full, dropping result");
        }
        Err(SendTimeoutError::Closed(_)) => {
            tracing::debug!(job_id = %job_id, "result receiver gone");
        }
    }
}

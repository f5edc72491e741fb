//! Shared test harness for integration tests.
//!
//! Fixture images, a processor factory, and instrumented steps and hooks.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use pf_core::{Error, ErrorKind, Hook, ImageState, Result, Scope, Step};
use pixelforge::{Config, Processor, Source};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    }))
}

pub fn solid(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([30, 120, 200])))
}

pub fn encode(img: &DynamicImage, format: ImageFormat) -> Bytes {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format).expect("fixture encode");
    Bytes::from(buf.into_inner())
}

pub fn png_bytes(width: u32, height: u32) -> Bytes {
    encode(&gradient(width, height), ImageFormat::Png)
}

pub fn jpeg_bytes(width: u32, height: u32) -> Bytes {
    encode(&gradient(width, height), ImageFormat::Jpeg)
}

pub fn png_source(width: u32, height: u32) -> Source {
    Source::from_bytes(png_bytes(width, height)).with_name(format!("{width}x{height}.png"))
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Small, fast configuration: two workers, no retry delay.
pub fn test_config() -> Config {
    Config {
        worker_count: 2,
        queue_capacity: 4,
        retry_delay_ms: 0,
        shutdown_grace_ms: 2_000,
        ..Config::default()
    }
}

pub fn processor() -> Processor {
    processor_with(test_config())
}

pub fn processor_with(config: Config) -> Processor {
    Processor::with_default_codecs(config).expect("valid test config")
}

// ---------------------------------------------------------------------------
// Instrumented steps
// ---------------------------------------------------------------------------

/// Passes the state through and counts calls.
#[derive(Default)]
pub struct CountingStep {
    pub name: &'static str,
    pub calls: AtomicU32,
}

impl CountingStep {
    pub fn named(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Step for CountingStep {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, _scope: &Scope, state: &ImageState) -> Result<ImageState> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(state.clone())
    }
}

/// Always fails; retryable or not, counting attempts.
pub struct FailingStep {
    pub retryable: bool,
    pub attempts: AtomicU32,
}

impl FailingStep {
    pub fn new(retryable: bool) -> Arc<Self> {
        Arc::new(Self {
            retryable,
            attempts: AtomicU32::new(0),
        })
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Step for FailingStep {
    fn name(&self) -> &str {
        "failing"
    }

    async fn execute(&self, _scope: &Scope, _state: &ImageState) -> Result<ImageState> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let err = Error::pipeline(self.name(), ErrorKind::msg("boom"));
        Err(if self.retryable { err.retryable() } else { err })
    }
}

/// Waits until opened or until the scope ends, then passes through.
/// Signals `started` on entry.
#[derive(Default)]
pub struct GateStep {
    pub started: Notify,
    pub open: CancellationToken,
    pub entered: AtomicU32,
}

impl GateStep {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn entered(&self) -> u32 {
        self.entered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Step for GateStep {
    fn name(&self) -> &str {
        "gate"
    }

    async fn execute(&self, scope: &Scope, state: &ImageState) -> Result<ImageState> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        tokio::select! {
            reason = scope.done() => Err(Error::pipeline(self.name(), reason)),
            _ = self.open.cancelled() => Ok(state.clone()),
        }
    }
}

/// Sleeps for a fixed duration, honouring the scope.
pub struct SlowStep(pub Duration);

#[async_trait]
impl Step for SlowStep {
    fn name(&self) -> &str {
        "slow"
    }

    async fn execute(&self, scope: &Scope, state: &ImageState) -> Result<ImageState> {
        tokio::select! {
            reason = scope.done() => Err(Error::pipeline(self.name(), reason)),
            _ = tokio::time::sleep(self.0) => Ok(state.clone()),
        }
    }
}

/// Sleeps for a fixed duration without looking at the scope, like a blocking
/// native codec call.
pub struct OpaqueStep(pub Duration);

#[async_trait]
impl Step for OpaqueStep {
    fn name(&self) -> &str {
        "opaque"
    }

    async fn execute(&self, _scope: &Scope, state: &ImageState) -> Result<ImageState> {
        tokio::time::sleep(self.0).await;
        Ok(state.clone())
    }
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Records `before:<step>` / `after:<step>` / `error:<step>` events.
#[derive(Default)]
pub struct RecordingHook {
    pub tag: &'static str,
    pub events: Arc<Mutex<Vec<String>>>,
}

impl RecordingHook {
    pub fn shared(tag: &'static str, events: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self { tag, events })
    }
}

#[async_trait]
impl Hook for RecordingHook {
    async fn before_step(&self, _scope: &Scope, step: &str, _state: &ImageState) {
        self.events.lock().push(format!("{}:before:{step}", self.tag));
    }

    async fn after_step(
        &self,
        _scope: &Scope,
        step: &str,
        _state: Option<&ImageState>,
        _elapsed: Duration,
        error: Option<&Error>,
    ) {
        let kind = if error.is_some() { "error" } else { "after" };
        self.events.lock().push(format!("{}:{kind}:{step}", self.tag));
    }
}

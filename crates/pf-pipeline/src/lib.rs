//! # pf-pipeline
//!
//! Running ordered step lists against an image state.
//!
//! This crate provides:
//!
//! - **[`RetryPolicy`]** -- bounded, cancellation-aware retry of a single
//!   step on retryable errors.
//! - **[`PipelineRunner`]** -- executes steps strictly in order, checks the
//!   scope before each one, fires hooks, and accumulates per-step timings.
//! - **[`hooks`]** -- a `tracing` logging hook and an in-memory metrics hook.
//! - **Built-in steps** ([`steps`]) -- decode, encode, resize, crop,
//!   thumbnail, grayscale, watermark, quality, format conversion, EXIF
//!   stripping, and adaptive compression.

pub mod hooks;
pub mod retry;
pub mod runner;
pub mod steps;

// Re-export key types at the crate root.
pub use hooks::{InMemoryMetrics, LoggingHook, MetricsCollector, MetricsHook, MetricsSnapshot};
pub use retry::RetryPolicy;
pub use runner::{PipelineRunner, RunOutput};
pub use steps::{
    scale_dimensions, AdaptiveCompressStep, AdaptiveTarget, ConvertFormatStep, CropStep,
    DecodeStep, EncodeStep, GrayscaleStep, QualityStep, ResizeStep, StripExifStep,
    ThumbnailStep, WatermarkStep,
};

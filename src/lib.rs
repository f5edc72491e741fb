//! Pixelforge - embeddable image transformation engine
//!
//! The [`Processor`] ingests image sources, runs them through ordered step
//! pipelines, fans out batches and named variants, and serves an
//! asynchronous job queue with a bounded worker pool. Codecs live in
//! `pf-codec`, steps and the pipeline runner in `pf-pipeline`, shared types
//! in `pf-core`.

pub mod config;
pub mod job;
pub mod processor;
pub mod storage;
mod worker;

pub use job::{result_channel, Job, JobResult, JobStatus};
pub use processor::{ProcessingResult, Processor, ProcessorStats, VariantDefinition};
pub use storage::{LocalStorage, StorageAdapter, StorageKey};

pub use pf_codec::Registry;
pub use pf_core::{Config, EncodeOptions, Error, ErrorKind, Format, ImageState, JobId, Result, Scope, Source, StepRef};
pub use pf_pipeline::AdaptiveTarget;

//! # pf-codec
//!
//! Everything between raw bytes and a decoded [`ImageState`](pf_core::ImageState).
//!
//! - **[`Registry`]** -- thread-safe format → decoder/encoder lookup.
//! - **[`ingest`]** -- pooled, size-bounded draining of a
//!   [`Source`](pf_core::Source) plus magic-byte format detection.
//! - **[`RasterCodec`]** -- JPEG/PNG/WebP on the `image` crate.
//! - **[`arena`]** -- a native-handle backend with an explicit runtime
//!   lifecycle and deterministic handle release.

pub mod arena;
pub mod ingest;
pub mod raster;
pub mod registry;

pub use arena::{ArenaBackend, ArenaImage, ArenaResize, ArenaRuntime, ARENA_BACKEND};
pub use ingest::{detect_format, resolve_format, BufferPool, Ingestor};
pub use raster::RasterCodec;
pub use registry::Registry;

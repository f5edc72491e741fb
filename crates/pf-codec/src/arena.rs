//! Arena backend: decoded pixels live in a runtime-owned arena and states
//! carry only a handle into it.
//!
//! This is the shape of a native-library backend. The [`ArenaRuntime`] is an
//! explicitly started, explicitly shut down resource object that the owner of
//! the process lifetime passes to whatever needs it. Each [`ArenaImage`]
//! frees its slot when dropped, so a handle lives exactly as long as the last
//! [`ImageState`] that references it.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, RgbaImage};
use parking_lot::Mutex;
use pf_core::{
    scale_dimensions, ColorSpace, DecodedImage, Decoder, EncodeOptions, Encoder, Error, ErrorKind,
    Format, ImageState, Metadata, NativeHandle, NativeImage, Result, Scope, Step,
};

use crate::ingest::detect_format;
use crate::raster::encode_blocking;

/// Backend tag reported by arena handles.
pub const ARENA_BACKEND: &str = "arena";

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

struct ArenaInner {
    slots: Mutex<HashMap<u64, Arc<RgbaImage>>>,
    next_id: AtomicU64,
    accepting: AtomicBool,
}

/// Owner of all arena allocations.
#[derive(Clone)]
pub struct ArenaRuntime {
    inner: Arc<ArenaInner>,
}

impl ArenaRuntime {
    /// Start a runtime that accepts allocations.
    pub fn start() -> Self {
        tracing::debug!("arena runtime started");
        Self {
            inner: Arc::new(ArenaInner {
                slots: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                accepting: AtomicBool::new(true),
            }),
        }
    }

    /// Stop accepting allocations and report handles still alive.
    ///
    /// Returns the number of leaked handles. Their slots are freed as the
    /// remaining handles drop.
    pub fn shutdown(&self) -> usize {
        self.inner.accepting.store(false, Ordering::SeqCst);
        let leaked = self.live_handles();
        if leaked > 0 {
            tracing::warn!(leaked, "arena runtime shut down with live handles");
        } else {
            tracing::debug!("arena runtime shut down cleanly");
        }
        leaked
    }

    pub fn is_running(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    /// Number of allocated, not yet released handles.
    pub fn live_handles(&self) -> usize {
        self.inner.slots.lock().len()
    }

    fn allocate(&self, op: &str, pixels: RgbaImage) -> Result<ArenaImage> {
        if !self.is_running() {
            return Err(Error::pipeline(op, ErrorKind::msg("arena runtime is shut down")));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (width, height) = pixels.dimensions();
        self.inner.slots.lock().insert(id, Arc::new(pixels));
        Ok(ArenaImage {
            id,
            width,
            height,
            runtime: self.inner.clone(),
        })
    }

    fn pixels(&self, op: &str, image: &ArenaImage) -> Result<Arc<RgbaImage>> {
        self.inner
            .slots
            .lock()
            .get(&image.id)
            .cloned()
            .ok_or_else(|| Error::pipeline(op, ErrorKind::msg(format!("arena slot {} not found", image.id))))
    }
}

impl fmt::Debug for ArenaRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaRuntime")
            .field("running", &self.is_running())
            .field("live_handles", &self.live_handles())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// A handle to pixels held by an [`ArenaRuntime`].
pub struct ArenaImage {
    id: u64,
    width: u32,
    height: u32,
    runtime: Arc<ArenaInner>,
}

impl ArenaImage {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl NativeImage for ArenaImage {
    fn backend(&self) -> &'static str {
        ARENA_BACKEND
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for ArenaImage {
    fn drop(&mut self) {
        self.runtime.slots.lock().remove(&self.id);
    }
}

impl fmt::Debug for ArenaImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaImage")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Borrow the arena handle from a state or fail with a wrong-backend error.
fn require_arena<'a>(op: &str, state: &'a ImageState) -> Result<&'a ArenaImage> {
    match state.decoded() {
        Some(DecodedImage::Native(handle)) => handle.downcast_ref::<ArenaImage>().ok_or_else(|| {
            Error::pipeline(
                op,
                ErrorKind::WrongBackend {
                    expected: ARENA_BACKEND,
                    found: handle.backend(),
                },
            )
        }),
        Some(other) => Err(Error::pipeline(
            op,
            ErrorKind::WrongBackend {
                expected: ARENA_BACKEND,
                found: other.backend(),
            },
        )),
        None => Err(Error::pipeline(op, ErrorKind::EmptyInput)),
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Decoder and encoder producing and consuming arena handles.
#[derive(Debug, Clone)]
pub struct ArenaBackend {
    runtime: ArenaRuntime,
    default_quality: u8,
}

impl ArenaBackend {
    pub fn new(runtime: ArenaRuntime, default_quality: u8) -> Self {
        Self {
            runtime,
            default_quality: default_quality.clamp(1, 100),
        }
    }

    pub fn runtime(&self) -> &ArenaRuntime {
        &self.runtime
    }
}

#[async_trait]
impl Decoder for ArenaBackend {
    fn can_decode(&self, format: Format) -> bool {
        format != Format::Unknown
    }

    async fn decode(&self, scope: &Scope, bytes: Bytes) -> Result<ImageState> {
        const OP: &str = "arena_decode";
        scope.check(OP)?;
        if bytes.is_empty() {
            return Err(Error::decode(OP, ErrorKind::EmptyInput));
        }
        let format = detect_format(&bytes);
        let img = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
            .await
            .map_err(|e| Error::pipeline(OP, ErrorKind::msg(format!("codec task failed: {e}"))))?
            .map_err(|e| Error::decode(OP, e.into()))?;

        let has_alpha = img.color().has_alpha();
        let handle = self.runtime.allocate(OP, img.into_rgba8())?;
        let meta = Metadata {
            format,
            color_space: if has_alpha { ColorSpace::Rgba } else { ColorSpace::Rgb },
            has_alpha,
            ..Metadata::default()
        };
        Ok(ImageState::from_decoded(
            DecodedImage::Native(NativeHandle::new(handle)),
            meta,
        ))
    }
}

#[async_trait]
impl Encoder for ArenaBackend {
    fn can_encode(&self, format: Format) -> bool {
        format != Format::Unknown
    }

    async fn encode(&self, scope: &Scope, state: &ImageState, opts: EncodeOptions) -> Result<Bytes> {
        const OP: &str = "arena_encode";
        scope.check(OP)?;
        let format = state.format();
        if !self.can_encode(format) {
            return Err(Error::encode(OP, ErrorKind::UnsupportedFormat(format)));
        }
        let pixels = self.runtime.pixels(OP, require_arena(OP, state)?)?;
        let quality = if opts.lossless {
            100
        } else {
            opts.quality_or(self.default_quality)
        };

        let out = tokio::task::spawn_blocking(move || {
            let img = DynamicImage::ImageRgba8((*pixels).clone());
            encode_blocking(&img, format, quality)
        })
        .await
        .map_err(|e| Error::pipeline(OP, ErrorKind::msg(format!("codec task failed: {e}"))))?
        .map_err(|e| Error::encode(OP, e.into()))?;
        Ok(Bytes::from(out))
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Resize an arena-backed image into a new arena handle.
///
/// The input state keeps its handle; the old slot is freed once every state
/// sharing it has been dropped.
#[derive(Debug, Clone)]
pub struct ArenaResize {
    runtime: ArenaRuntime,
    width: u32,
    height: u32,
}

impl ArenaResize {
    pub fn new(runtime: ArenaRuntime, width: u32, height: u32) -> Self {
        Self {
            runtime,
            width,
            height,
        }
    }
}

#[async_trait]
impl Step for ArenaResize {
    fn name(&self) -> &str {
        "arena_resize"
    }

    async fn execute(&self, scope: &Scope, state: &ImageState) -> Result<ImageState> {
        scope.check(self.name())?;
        let handle = require_arena(self.name(), state)?;
        let (src_w, src_h) = handle.dimensions();
        let (dst_w, dst_h) = scale_dimensions(src_w, src_h, self.width, self.height);
        if (dst_w, dst_h) == (src_w, src_h) {
            return Ok(state.clone());
        }
        if dst_w == 0 || dst_h == 0 {
            return Err(Error::pipeline(
                self.name(),
                ErrorKind::InvalidDimensions(format!("{dst_w}x{dst_h}")),
            ));
        }

        let pixels = self.runtime.pixels(self.name(), handle)?;
        let resized = tokio::task::spawn_blocking(move || {
            image::imageops::resize(&*pixels, dst_w, dst_h, FilterType::Triangle)
        })
        .await
        .map_err(|e| Error::pipeline(self.name(), ErrorKind::msg(format!("resize task failed: {e}"))))?;

        let next = self.runtime.allocate(self.name(), resized)?;
        Ok(state
            .clone()
            .with_decoded(DecodedImage::Native(NativeHandle::new(next))))
    }
}

//! The value threaded through a pipeline.
//!
//! [`ImageState`] is immutable by convention: every field is private and
//! transforms produce a new value through the consuming `with_*` builders.
//! `Clone` is shallow. Encoded bytes are [`Bytes`] and decoded pixels sit
//! behind an `Arc`, so concurrent variant branches can share a common base
//! state without copying pixels and without observing each other's changes.
//!
//! Decoded pixels are a closed set of backends ([`DecodedImage`]). A native
//! handle is released when the last state referencing it is dropped, which
//! makes release deterministic and keeps a handle alive for as long as any
//! sibling branch still points at it.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use image::DynamicImage;

use crate::error::{Error, ErrorKind, Result};
use crate::media::{Format, Metadata};

/// Backend tag for pure in-memory bitmaps.
pub const BITMAP_BACKEND: &str = "bitmap";

// ---------------------------------------------------------------------------
// Native handles
// ---------------------------------------------------------------------------

/// Capability a native-library image must provide to the core.
///
/// Implementors free their native resource in `Drop`; the core never calls
/// into the library directly.
pub trait NativeImage: Send + Sync + fmt::Debug {
    /// Short tag naming the owning backend, used for "wrong backend" errors.
    fn backend(&self) -> &'static str;

    /// Pixel dimensions as `(width, height)`.
    fn dimensions(&self) -> (u32, u32);

    /// Downcast support for the owning backend's steps.
    fn as_any(&self) -> &dyn Any;
}

/// Shared ownership token for a [`NativeImage`].
#[derive(Clone, Debug)]
pub struct NativeHandle(Arc<dyn NativeImage>);

impl NativeHandle {
    pub fn new(image: impl NativeImage + 'static) -> Self {
        Self(Arc::new(image))
    }

    pub fn backend(&self) -> &'static str {
        self.0.backend()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    /// Borrow the concrete image if it belongs to backend type `T`.
    pub fn downcast_ref<T: NativeImage + 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    /// Number of states (across all branches) that currently share this handle.
    pub fn share_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

// ---------------------------------------------------------------------------
// DecodedImage
// ---------------------------------------------------------------------------

/// Decoded pixel data, tagged by the backend that produced it.
#[derive(Clone, Debug)]
pub enum DecodedImage {
    /// Pure in-memory bitmap from the `image` crate.
    Bitmap(Arc<DynamicImage>),
    /// Handle owned by a native backend.
    Native(NativeHandle),
}

impl DecodedImage {
    pub fn bitmap(image: DynamicImage) -> Self {
        Self::Bitmap(Arc::new(image))
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Self::Bitmap(_) => BITMAP_BACKEND,
            Self::Native(handle) => handle.backend(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Bitmap(img) => (img.width(), img.height()),
            Self::Native(handle) => handle.dimensions(),
        }
    }
}

// ---------------------------------------------------------------------------
// EncodeSettings
// ---------------------------------------------------------------------------

/// Encode parameters chosen by earlier steps for a later encode step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeSettings {
    /// Desired quality (1-100); `None` keeps the encoder's configured value.
    pub quality: Option<u8>,
}

// ---------------------------------------------------------------------------
// ImageState
// ---------------------------------------------------------------------------

/// Image data passed from step to step.
#[derive(Clone, Debug, Default)]
pub struct ImageState {
    encoded: Option<Bytes>,
    format: Format,
    decoded: Option<DecodedImage>,
    metadata: Metadata,
    original_size: u64,
    encode: EncodeSettings,
}

impl ImageState {
    /// Initial state for freshly ingested bytes.
    pub fn from_encoded(bytes: Bytes, format: Format) -> Self {
        let len = bytes.len() as u64;
        Self {
            metadata: Metadata {
                format,
                size_bytes: len,
                ..Metadata::default()
            },
            encoded: Some(bytes),
            format,
            decoded: None,
            original_size: len,
            encode: EncodeSettings::default(),
        }
    }

    /// State for a freshly decoded image. Dimensions are taken from the handle.
    pub fn from_decoded(decoded: DecodedImage, mut metadata: Metadata) -> Self {
        let (width, height) = decoded.dimensions();
        metadata.width = width;
        metadata.height = height;
        Self {
            format: metadata.format,
            metadata,
            decoded: Some(decoded),
            ..Self::default()
        }
    }

    // -- Accessors ------------------------------------------------------------

    pub fn encoded(&self) -> Option<&Bytes> {
        self.encoded.as_ref()
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn decoded(&self) -> Option<&DecodedImage> {
        self.decoded.as_ref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Size of the very first ingested payload.
    pub fn original_size(&self) -> u64 {
        self.original_size
    }

    pub fn encode_settings(&self) -> EncodeSettings {
        self.encode
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.metadata.width, self.metadata.height)
    }

    /// The decoded bitmap, or an error naming `op` when the state is still
    /// encoded or holds a native handle.
    pub fn require_bitmap(&self, op: &str) -> Result<&Arc<DynamicImage>> {
        match &self.decoded {
            Some(DecodedImage::Bitmap(img)) => Ok(img),
            Some(DecodedImage::Native(handle)) => Err(Error::pipeline(
                op,
                ErrorKind::WrongBackend {
                    expected: BITMAP_BACKEND,
                    found: handle.backend(),
                },
            )),
            None => Err(Error::pipeline(op, ErrorKind::EmptyInput)),
        }
    }

    // -- Builders -------------------------------------------------------------

    /// Replace the encoded payload and update `size_bytes` to match.
    #[must_use]
    pub fn with_encoded(mut self, bytes: Bytes) -> Self {
        self.metadata.size_bytes = bytes.len() as u64;
        self.encoded = Some(bytes);
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self.metadata.format = format;
        self
    }

    /// Replace the decoded handle and sync the dimensions. The previous handle
    /// is released here unless another state still shares it.
    #[must_use]
    pub fn with_decoded(mut self, decoded: DecodedImage) -> Self {
        let (width, height) = decoded.dimensions();
        self.metadata.width = width;
        self.metadata.height = height;
        self.decoded = Some(decoded);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Apply an in-place edit to a copy of the metadata.
    #[must_use]
    pub fn map_metadata(mut self, f: impl FnOnce(&mut Metadata)) -> Self {
        f(&mut self.metadata);
        self
    }

    #[must_use]
    pub fn with_original_size(mut self, size: u64) -> Self {
        self.original_size = size;
        self
    }

    #[must_use]
    pub fn with_encode_settings(mut self, settings: EncodeSettings) -> Self {
        self.encode = settings;
        self
    }

    /// Drop this state's reference to its decoded handle.
    pub fn release_decoded(&mut self) {
        self.decoded = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct CountedImage {
        released: Arc<AtomicUsize>,
    }

    impl NativeImage for CountedImage {
        fn backend(&self) -> &'static str {
            "counted"
        }
        fn dimensions(&self) -> (u32, u32) {
            (4, 2)
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    impl Drop for CountedImage {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn builders_leave_original_untouched() {
        let base = ImageState::from_encoded(Bytes::from_static(b"abc"), Format::Png);
        let changed = base
            .clone()
            .with_format(Format::Jpeg)
            .with_encoded(Bytes::from_static(b"abcdef"));

        assert_eq!(base.format(), Format::Png);
        assert_eq!(base.metadata().size_bytes, 3);
        assert_eq!(changed.format(), Format::Jpeg);
        assert_eq!(changed.metadata().size_bytes, 6);
        assert_eq!(changed.original_size(), 3);
    }

    #[test]
    fn with_decoded_syncs_dimensions() {
        let state = ImageState::default()
            .with_decoded(DecodedImage::bitmap(DynamicImage::new_rgb8(8, 6)));
        assert_eq!(state.dimensions(), (8, 6));
    }

    #[test]
    fn native_handle_released_when_last_state_drops() {
        let released = Arc::new(AtomicUsize::new(0));
        let handle = NativeHandle::new(CountedImage {
            released: released.clone(),
        });
        let base = ImageState::default().with_decoded(DecodedImage::Native(handle));
        let sibling = base.clone();

        // Replacing the handle in one branch must not free the shared one.
        let replaced = sibling.with_decoded(DecodedImage::bitmap(DynamicImage::new_rgb8(1, 1)));
        assert_eq!(released.load(Ordering::SeqCst), 0);

        drop(replaced);
        drop(base);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn explicit_release() {
        let released = Arc::new(AtomicUsize::new(0));
        let mut state = ImageState::default().with_decoded(DecodedImage::Native(NativeHandle::new(
            CountedImage {
                released: released.clone(),
            },
        )));
        state.release_decoded();
        assert!(state.decoded().is_none());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn require_bitmap_rejects_native() {
        let state = ImageState::default().with_decoded(DecodedImage::Native(NativeHandle::new(
            CountedImage {
                released: Arc::new(AtomicUsize::new(0)),
            },
        )));
        let err = state.require_bitmap("grayscale").unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::WrongBackend {
                expected: "bitmap",
                found: "counted"
            }
        ));
        assert_eq!(err.op(), "grayscale");
    }

    #[test]
    fn require_bitmap_rejects_undecoded() {
        let state = ImageState::from_encoded(Bytes::from_static(b"x"), Format::Jpeg);
        let err = state.require_bitmap("resize").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::EmptyInput));
    }
}

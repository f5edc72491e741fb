//! Format registry: maps a [`Format`] to its decoder and encoder.
//!
//! Registration may happen while work is in flight. Lookups take a read lock
//! and clone the `Arc`, so a caller never observes a half-written map and
//! never holds the lock across an await.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use pf_core::{Decoder, Encoder, Format};

use crate::raster::RasterCodec;

/// Thread-safe decoder/encoder lookup. Last writer wins per format.
#[derive(Default)]
pub struct Registry {
    decoders: RwLock<HashMap<Format, Arc<dyn Decoder>>>,
    encoders: RwLock<HashMap<Format, Arc<dyn Encoder>>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `image`-crate codecs for JPEG, PNG and WebP.
    pub fn with_defaults(default_quality: u8) -> Self {
        let registry = Self::new();
        let codec = Arc::new(RasterCodec::new(default_quality));
        for format in [Format::Jpeg, Format::Png, Format::Webp] {
            registry.register_decoder(format, codec.clone());
            registry.register_encoder(format, codec.clone());
        }
        registry
    }

    pub fn register_decoder(&self, format: Format, decoder: Arc<dyn Decoder>) {
        tracing::debug!(%format, "registering decoder");
        self.decoders.write().insert(format, decoder);
    }

    pub fn register_encoder(&self, format: Format, encoder: Arc<dyn Encoder>) {
        tracing::debug!(%format, "registering encoder");
        self.encoders.write().insert(format, encoder);
    }

    pub fn decoder_for(&self, format: Format) -> Option<Arc<dyn Decoder>> {
        self.decoders.read().get(&format).cloned()
    }

    pub fn encoder_for(&self, format: Format) -> Option<Arc<dyn Encoder>> {
        self.encoders.read().get(&format).cloned()
    }

    /// Formats with a registered decoder, sorted for stable output.
    pub fn decodable_formats(&self) -> Vec<Format> {
        let mut formats: Vec<_> = self.decoders.read().keys().copied().collect();
        formats.sort_by_key(|f| f.to_string());
        formats
    }

    /// Formats with a registered encoder, sorted for stable output.
    pub fn encodable_formats(&self) -> Vec<Format> {
        let mut formats: Vec<_> = self.encoders.read().keys().copied().collect();
        formats.sort_by_key(|f| f.to_string());
        formats
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("decoders", &self.decodable_formats())
            .field("encoders", &self.encodable_formats())
            .finish()
    }
}

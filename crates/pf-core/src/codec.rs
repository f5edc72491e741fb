//! Codec capabilities consumed by the registry and the codec steps.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::media::Format;
use crate::scope::Scope;
use crate::state::ImageState;

/// Parameters for a single encode call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeOptions {
    /// 1-100; 0 selects the encoder's default.
    pub quality: u8,
    pub lossless: bool,
    pub strip_metadata: bool,
    pub interlaced: bool,
}

impl EncodeOptions {
    pub fn with_quality(quality: u8) -> Self {
        Self {
            quality,
            ..Self::default()
        }
    }

    /// The requested quality, or `default` when unset.
    pub fn quality_or(&self, default: u8) -> u8 {
        if self.quality == 0 {
            default
        } else {
            self.quality
        }
    }
}

/// Turns encoded bytes into a decoded [`ImageState`].
#[async_trait]
pub trait Decoder: Send + Sync {
    fn can_decode(&self, format: Format) -> bool;

    /// Decode `bytes`. The returned state's metadata must describe the
    /// decoded image; the caller fills in the encoded payload and sizes.
    async fn decode(&self, scope: &Scope, bytes: Bytes) -> Result<ImageState>;
}

/// Turns a decoded [`ImageState`] back into bytes.
#[async_trait]
pub trait Encoder: Send + Sync {
    fn can_encode(&self, format: Format) -> bool;

    async fn encode(&self, scope: &Scope, state: &ImageState, opts: EncodeOptions)
        -> Result<Bytes>;
}

//! Decode and encode steps backed by the format registry.

use std::sync::Arc;

use async_trait::async_trait;
use pf_codec::Registry;
use pf_core::{EncodeOptions, Error, ErrorKind, ImageState, Result, Scope, Step};

/// Decode the encoded payload with the registered decoder for its format.
///
/// The state's format is kept even if the decoder sniffs another one, so a
/// caller's content-type hint survives decoding. A state that is already
/// decoded passes through unchanged.
#[derive(Debug, Clone)]
pub struct DecodeStep {
    registry: Arc<Registry>,
}

impl DecodeStep {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Step for DecodeStep {
    fn name(&self) -> &str {
        "decode"
    }

    async fn execute(&self, scope: &Scope, state: &ImageState) -> Result<ImageState> {
        if state.decoded().is_some() {
            return Ok(state.clone());
        }
        let bytes = match state.encoded() {
            Some(bytes) if !bytes.is_empty() => bytes.clone(),
            _ => return Err(Error::decode(self.name(), ErrorKind::EmptyInput)),
        };
        let format = state.format();
        let decoder = self
            .registry
            .decoder_for(format)
            .ok_or_else(|| Error::decode(self.name(), ErrorKind::UnsupportedFormat(format)))?;

        let decoded = decoder.decode(scope, bytes.clone()).await?;
        Ok(decoded
            .with_format(format)
            .with_encoded(bytes)
            .with_original_size(state.original_size())
            .with_encode_settings(state.encode_settings()))
    }
}

/// Encode the decoded image with the registered encoder for the state's
/// current format.
///
/// A quality chosen by an earlier [`QualityStep`](super::QualityStep)
/// overrides the configured options.
#[derive(Debug, Clone)]
pub struct EncodeStep {
    registry: Arc<Registry>,
    options: EncodeOptions,
}

impl EncodeStep {
    pub fn new(registry: Arc<Registry>, options: EncodeOptions) -> Self {
        Self { registry, options }
    }
}

#[async_trait]
impl Step for EncodeStep {
    fn name(&self) -> &str {
        "encode"
    }

    async fn execute(&self, scope: &Scope, state: &ImageState) -> Result<ImageState> {
        let format = state.format();
        let encoder = self
            .registry
            .encoder_for(format)
            .ok_or_else(|| Error::encode(self.name(), ErrorKind::UnsupportedFormat(format)))?;

        let mut opts = self.options;
        if let Some(quality) = state.encode_settings().quality {
            opts.quality = quality;
        }
        let bytes = encoder.encode(scope, state, opts).await?;

        let next = state.clone().with_encoded(bytes);
        Ok(if opts.strip_metadata {
            next.map_metadata(|m| {
                m.exif = None;
                m.orientation = 0;
            })
        } else {
            next
        })
    }
}

//! Adaptive compression: search downward through quality levels until the
//! encoded output fits a byte budget.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use pf_codec::Registry;
use pf_core::{EncodeOptions, EncodeSettings, ImageState, Result, Scope, Step};

const DEFAULT_STEP: u8 = 5;

/// Size budget for [`AdaptiveCompressStep`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AdaptiveTarget {
    /// Absolute ceiling in bytes.
    Bytes(u64),
    /// Fraction of the originally ingested payload size.
    RatioOfOriginal(f32),
}

impl AdaptiveTarget {
    /// Budget in bytes for an image whose first payload was `original` bytes.
    /// Zero means "no budget".
    pub fn resolve(&self, original: u64) -> u64 {
        match *self {
            Self::Bytes(n) => n,
            Self::RatioOfOriginal(ratio) if ratio > 0.0 => (original as f64 * f64::from(ratio)) as u64,
            Self::RatioOfOriginal(_) => 0,
        }
    }
}

/// Encode at decreasing qualities, from `max_quality` down to `min_quality`
/// in `step_size` decrements, stopping at the first result within budget.
///
/// Assumes lower quality never produces larger output. The most recent
/// encode is kept even when no quality met the budget, so the result is
/// best-effort. A zero budget or a format without an encoder passes the state
/// through untouched.
#[derive(Debug, Clone)]
pub struct AdaptiveCompressStep {
    registry: Arc<Registry>,
    target: AdaptiveTarget,
    min_quality: u8,
    max_quality: u8,
    step_size: u8,
    options: EncodeOptions,
}

impl AdaptiveCompressStep {
    /// `min_quality` 0 means one below `max_quality`; `step_size` 0 means 5.
    pub fn new(
        registry: Arc<Registry>,
        target: AdaptiveTarget,
        min_quality: u8,
        max_quality: u8,
        step_size: u8,
    ) -> Self {
        let max_quality = max_quality.clamp(1, 100);
        let min_quality = match min_quality {
            0 => max_quality.saturating_sub(1).max(1),
            q => q.min(max_quality),
        };
        let step_size = if step_size == 0 { DEFAULT_STEP } else { step_size };
        Self {
            registry,
            target,
            min_quality,
            max_quality,
            step_size,
            options: EncodeOptions::default(),
        }
    }

    /// Builder: base options for every trial encode. The quality field is
    /// overwritten per trial.
    pub fn with_options(mut self, options: EncodeOptions) -> Self {
        self.options = options;
        self
    }

    /// Quality levels tried, in order.
    fn qualities(&self) -> impl Iterator<Item = u8> + '_ {
        let step = usize::from(self.step_size);
        (self.min_quality..=self.max_quality).rev().step_by(step)
    }
}

#[async_trait]
impl Step for AdaptiveCompressStep {
    fn name(&self) -> &str {
        "adaptive_compress"
    }

    async fn execute(&self, scope: &Scope, state: &ImageState) -> Result<ImageState> {
        let target = self.target.resolve(state.original_size());
        if target == 0 {
            return Ok(state.clone());
        }
        let format = state.format();
        let Some(encoder) = self.registry.encoder_for(format) else {
            tracing::debug!(step = self.name(), %format, "no encoder, passing through");
            return Ok(state.clone());
        };

        let mut best: Option<(Bytes, u8)> = None;
        let mut attempts = 0u32;
        for quality in self.qualities() {
            scope.check(self.name())?;
            let opts = EncodeOptions {
                quality,
                ..self.options
            };
            let bytes = encoder.encode(scope, state, opts).await?;
            attempts += 1;
            let fits = bytes.len() as u64 <= target;
            best = Some((bytes, quality));
            if fits {
                break;
            }
        }

        let Some((bytes, quality)) = best else {
            return Ok(state.clone());
        };
        tracing::debug!(
            step = self.name(),
            target,
            quality,
            attempts,
            size_bytes = bytes.len(),
            met_target = bytes.len() as u64 <= target,
            "adaptive compression finished"
        );
        Ok(state
            .clone()
            .with_encoded(bytes)
            .with_encode_settings(EncodeSettings {
                quality: Some(quality),
            }))
    }
}

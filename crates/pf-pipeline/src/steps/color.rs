//! Pixel-level bitmap steps.

use std::sync::Arc;

use async_trait::async_trait;
use image::{imageops, DynamicImage};
use pf_core::{ColorSpace, DecodedImage, ImageState, Result, Scope, Step};

/// Convert to grayscale, keeping an alpha channel if present.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrayscaleStep;

#[async_trait]
impl Step for GrayscaleStep {
    fn name(&self) -> &str {
        "grayscale"
    }

    async fn execute(&self, scope: &Scope, state: &ImageState) -> Result<ImageState> {
        scope.check(self.name())?;
        let gray = state.require_bitmap(self.name())?.grayscale();
        let has_alpha = gray.color().has_alpha();
        Ok(state
            .clone()
            .with_decoded(DecodedImage::bitmap(gray))
            .map_metadata(|m| {
                m.color_space = ColorSpace::Gray;
                m.has_alpha = has_alpha;
            }))
    }
}

/// Composite a watermark over the image at a fixed offset.
#[derive(Debug, Clone)]
pub struct WatermarkStep {
    mark: Arc<DynamicImage>,
    offset_x: i64,
    offset_y: i64,
}

impl WatermarkStep {
    pub fn new(mark: DynamicImage, offset_x: i64, offset_y: i64) -> Self {
        Self {
            mark: Arc::new(mark),
            offset_x,
            offset_y,
        }
    }
}

#[async_trait]
impl Step for WatermarkStep {
    fn name(&self) -> &str {
        "watermark"
    }

    async fn execute(&self, scope: &Scope, state: &ImageState) -> Result<ImageState> {
        scope.check(self.name())?;
        let mut canvas = state.require_bitmap(self.name())?.to_rgba8();
        imageops::overlay(&mut canvas, &self.mark.to_rgba8(), self.offset_x, self.offset_y);
        Ok(state
            .clone()
            .with_decoded(DecodedImage::bitmap(DynamicImage::ImageRgba8(canvas)))
            .map_metadata(|m| {
                m.color_space = ColorSpace::Rgba;
                m.has_alpha = true;
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::test_support::bitmap_state;
    use image::{GenericImageView, Rgba, RgbaImage};

    #[tokio::test]
    async fn grayscale_sets_color_space() {
        let input = bitmap_state(8, 8);
        let out = GrayscaleStep.execute(&Scope::new(), &input).await.unwrap();
        assert_eq!(out.metadata().color_space, ColorSpace::Gray);
        assert_eq!(input.metadata().color_space, ColorSpace::Rgb);
        assert_eq!(out.dimensions(), (8, 8));
    }

    #[tokio::test]
    async fn watermark_paints_at_offset() {
        let mark = DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255])));
        let out = WatermarkStep::new(mark, 3, 4)
            .execute(&Scope::new(), &bitmap_state(10, 10))
            .await
            .unwrap();
        let img = out.require_bitmap("test").unwrap();
        assert_eq!(img.get_pixel(3, 4), Rgba([255, 0, 0, 255]));
        assert_ne!(img.get_pixel(0, 0), Rgba([255, 0, 0, 255]));
        assert_eq!(out.dimensions(), (10, 10));
    }
}

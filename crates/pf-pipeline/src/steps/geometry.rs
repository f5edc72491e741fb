//! Geometry steps on decoded bitmaps: resize, crop, thumbnail.

use async_trait::async_trait;
use image::imageops::FilterType;
use pf_core::{scale_dimensions, DecodedImage, Error, ErrorKind, ImageState, Result, Scope, Step};

/// Resize to the given dimensions. A zero axis is derived from the other one,
/// preserving the aspect ratio; both zero is a no-op.
#[derive(Debug, Clone, Copy)]
pub struct ResizeStep {
    pub width: u32,
    pub height: u32,
    pub filter: FilterType,
}

impl ResizeStep {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            filter: FilterType::Triangle,
        }
    }

    /// Builder: set the resampling filter.
    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }
}

#[async_trait]
impl Step for ResizeStep {
    fn name(&self) -> &str {
        "resize"
    }

    async fn execute(&self, scope: &Scope, state: &ImageState) -> Result<ImageState> {
        scope.check(self.name())?;
        let img = state.require_bitmap(self.name())?.clone();
        let (src_w, src_h) = (img.width(), img.height());
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

        let filter = self.filter;
        let resized = tokio::task::spawn_blocking(move || img.resize_exact(dst_w, dst_h, filter))
            .await
            .map_err(|e| Error::pipeline(self.name(), ErrorKind::msg(format!("resize task failed: {e}"))))?;
        Ok(state.clone().with_decoded(DecodedImage::bitmap(resized)))
    }
}

/// Cut a rectangle out of the image. The rectangle must lie inside it.
#[derive(Debug, Clone, Copy)]
pub struct CropStep {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropStep {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

#[async_trait]
impl Step for CropStep {
    fn name(&self) -> &str {
        "crop"
    }

    async fn execute(&self, scope: &Scope, state: &ImageState) -> Result<ImageState> {
        scope.check(self.name())?;
        let img = state.require_bitmap(self.name())?;
        let fits = self.width > 0
            && self.height > 0
            && u64::from(self.x) + u64::from(self.width) <= u64::from(img.width())
            && u64::from(self.y) + u64::from(self.height) <= u64::from(img.height());
        if !fits {
            return Err(Error::pipeline(
                self.name(),
                ErrorKind::InvalidDimensions(format!(
                    "crop {}x{}+{}+{} exceeds image bounds {}x{}",
                    self.width,
                    self.height,
                    self.x,
                    self.y,
                    img.width(),
                    img.height()
                )),
            ));
        }

        let cropped = img.crop_imm(self.x, self.y, self.width, self.height);
        Ok(state.clone().with_decoded(DecodedImage::bitmap(cropped)))
    }
}

/// Square thumbnail: scale the shorter side to `size`, then centre-crop.
#[derive(Debug, Clone, Copy)]
pub struct ThumbnailStep {
    pub size: u32,
}

impl ThumbnailStep {
    pub fn new(size: u32) -> Self {
        Self { size }
    }
}

#[async_trait]
impl Step for ThumbnailStep {
    fn name(&self) -> &str {
        "thumbnail"
    }

    async fn execute(&self, scope: &Scope, state: &ImageState) -> Result<ImageState> {
        if self.size == 0 {
            return Err(Error::pipeline(
                self.name(),
                ErrorKind::InvalidDimensions("thumbnail size must be positive".into()),
            ));
        }
        let (width, height) = state.require_bitmap(self.name()).map(|img| (img.width(), img.height()))?;
        let resize = if width < height {
            ResizeStep::new(self.size, 0)
        } else {
            ResizeStep::new(0, self.size)
        };
        let resized = resize.execute(scope, state).await?;

        let (rw, rh) = resized.dimensions();
        let crop = CropStep::new(
            rw.saturating_sub(self.size) / 2,
            rh.saturating_sub(self.size) / 2,
            self.size.min(rw),
            self.size.min(rh),
        );
        crop.execute(scope, &resized).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::test_support::bitmap_state;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn resize_preserves_aspect() {
        let out = ResizeStep::new(400, 0)
            .execute(&Scope::new(), &bitmap_state(800, 600))
            .await
            .unwrap();
        assert_eq!(out.dimensions(), (400, 300));
        let decoded = out.decoded().unwrap().dimensions();
        assert_eq!(decoded, (400, 300));
    }

    #[tokio::test]
    async fn resize_to_current_size_is_identity() {
        let input = bitmap_state(80, 60);
        for (w, h) in [(80, 60), (0, 0), (80, 0), (0, 60)] {
            let out = ResizeStep::new(w, h)
                .execute(&Scope::new(), &input)
                .await
                .unwrap();
            assert_eq!(out.metadata(), input.metadata());
        }
    }

    #[tokio::test]
    async fn resize_does_not_touch_input() {
        let input = bitmap_state(80, 60);
        let _ = ResizeStep::new(10, 10)
            .execute(&Scope::new(), &input)
            .await
            .unwrap();
        assert_eq!(input.dimensions(), (80, 60));
        assert_eq!(input.decoded().unwrap().dimensions(), (80, 60));
    }

    #[tokio::test]
    async fn resize_rejects_degenerate_target() {
        let err = ResizeStep::new(1, 0)
            .execute(&Scope::new(), &bitmap_state(1000, 1))
            .await
            .unwrap_err();
        assert_matches!(err.kind(), ErrorKind::InvalidDimensions(_));
    }

    #[tokio::test]
    async fn crop_inside_bounds() {
        let out = CropStep::new(10, 5, 20, 15)
            .execute(&Scope::new(), &bitmap_state(50, 40))
            .await
            .unwrap();
        assert_eq!(out.dimensions(), (20, 15));
    }

    #[tokio::test]
    async fn crop_outside_bounds_fails() {
        let err = CropStep::new(40, 0, 20, 10)
            .execute(&Scope::new(), &bitmap_state(50, 40))
            .await
            .unwrap_err();
        assert_eq!(err.op(), "crop");
        assert_matches!(err.kind(), ErrorKind::InvalidDimensions(_));
    }

    #[tokio::test]
    async fn thumbnail_is_square() {
        for (w, h) in [(300, 200), (200, 300), (64, 64)] {
            let out = ThumbnailStep::new(50)
                .execute(&Scope::new(), &bitmap_state(w, h))
                .await
                .unwrap();
            assert_eq!(out.dimensions(), (50, 50));
        }
    }

    #[tokio::test]
    async fn bitmap_steps_require_decoded_state() {
        let state = ImageState::default();
        let err = ResizeStep::new(10, 10)
            .execute(&Scope::new(), &state)
            .await
            .unwrap_err();
        assert_matches!(err.kind(), ErrorKind::EmptyInput);
    }
}

//! Built-in pipeline steps.
//!
//! Every step is stateless with respect to a single invocation and builds its
//! output from a shallow clone of the input, so step instances can be shared
//! across concurrent pipelines and variant branches.

mod adaptive;
mod codec;
mod color;
mod geometry;
mod settings;

pub use adaptive::{AdaptiveCompressStep, AdaptiveTarget};
pub use codec::{DecodeStep, EncodeStep};
pub use color::{GrayscaleStep, WatermarkStep};
pub use geometry::{CropStep, ResizeStep, ThumbnailStep};
pub use pf_core::scale_dimensions;
pub use settings::{ConvertFormatStep, QualityStep, StripExifStep};

#[cfg(test)]
pub(crate) mod test_support {
    use image::{DynamicImage, Rgb, RgbImage};
    use pf_core::{DecodedImage, Format, ImageState};

    /// A decoded bitmap state with a simple gradient.
    pub fn bitmap_state(width: u32, height: u32) -> ImageState {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        ImageState::default()
            .with_decoded(DecodedImage::bitmap(DynamicImage::ImageRgb8(img)))
            .with_format(Format::Png)
    }
}

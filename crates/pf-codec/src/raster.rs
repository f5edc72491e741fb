//! JPEG, PNG and WebP codecs on the `image` crate.
//!
//! Decoding and encoding are CPU bound, so both run on the blocking pool.
//! The scope is checked before the work is handed off; once a codec call is
//! running it is bounded only by the job-level deadline.

use std::collections::HashMap;
use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{ColorType, DynamicImage, ExtendedColorType, ImageDecoder, ImageEncoder, ImageFormat, ImageReader};
use pf_core::{
    ColorSpace, DecodedImage, Decoder, EncodeOptions, Encoder, Error, ErrorKind, Format,
    ImageState, Metadata, Result, Scope,
};

use crate::ingest::detect_format;

/// Pure in-memory codec for the raster formats the `image` crate handles.
#[derive(Debug, Clone)]
pub struct RasterCodec {
    default_quality: u8,
}

impl RasterCodec {
    pub fn new(default_quality: u8) -> Self {
        Self {
            default_quality: default_quality.clamp(1, 100),
        }
    }
}

impl Default for RasterCodec {
    fn default() -> Self {
        Self::new(85)
    }
}

fn image_format(format: Format) -> Option<ImageFormat> {
    match format {
        Format::Jpeg => Some(ImageFormat::Jpeg),
        Format::Png => Some(ImageFormat::Png),
        Format::Webp => Some(ImageFormat::WebP),
        Format::Unknown => None,
    }
}

fn color_space(color: ColorType) -> ColorSpace {
    match color {
        ColorType::L8 | ColorType::L16 | ColorType::La8 | ColorType::La16 => ColorSpace::Gray,
        c if c.has_alpha() => ColorSpace::Rgba,
        _ => ColorSpace::Rgb,
    }
}

fn join_error(op: &str, err: tokio::task::JoinError) -> Error {
    Error::new(
        pf_core::Category::Pipeline,
        op,
        ErrorKind::msg(format!("codec task failed: {err}")),
    )
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

fn decode_blocking(bytes: &[u8], format: ImageFormat) -> image::ImageResult<(DynamicImage, Metadata)> {
    let mut decoder = ImageReader::with_format(Cursor::new(bytes), format).into_decoder()?;
    let orientation = decoder.orientation()?.to_exif();
    let exif = decoder.exif_metadata()?.map(|raw| {
        HashMap::from([
            ("Orientation".to_string(), orientation.to_string()),
            ("RawLength".to_string(), raw.len().to_string()),
        ])
    });
    let img = DynamicImage::from_decoder(decoder)?;

    let color = img.color();
    let meta = Metadata {
        width: img.width(),
        height: img.height(),
        color_space: color_space(color),
        has_alpha: color.has_alpha(),
        exif,
        orientation,
        ..Metadata::default()
    };
    Ok((img, meta))
}

#[async_trait]
impl Decoder for RasterCodec {
    fn can_decode(&self, format: Format) -> bool {
        image_format(format).is_some()
    }

    async fn decode(&self, scope: &Scope, bytes: Bytes) -> Result<ImageState> {
        const OP: &str = "decode";
        scope.check(OP)?;
        if bytes.is_empty() {
            return Err(Error::decode(OP, ErrorKind::EmptyInput));
        }
        let format = detect_format(&bytes);
        let Some(image_fmt) = image_format(format) else {
            return Err(Error::decode(OP, ErrorKind::UnsupportedFormat(format)));
        };

        let (img, mut meta) = tokio::task::spawn_blocking(move || decode_blocking(&bytes, image_fmt))
            .await
            .map_err(|e| join_error(OP, e))?
            .map_err(|e| Error::decode(OP, e.into()))?;
        meta.format = format;

        tracing::trace!(width = meta.width, height = meta.height, %format, "decoded raster image");
        Ok(ImageState::from_decoded(DecodedImage::bitmap(img), meta))
    }
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

fn png_compression(quality: u8) -> CompressionType {
    // PNG is lossless: quality only trades encode time for size.
    match quality {
        0..=39 => CompressionType::Best,
        40..=79 => CompressionType::Default,
        _ => CompressionType::Fast,
    }
}

pub(crate) fn encode_blocking(img: &DynamicImage, format: Format, quality: u8) -> image::ImageResult<Vec<u8>> {
    let mut out = Vec::new();
    let (width, height) = (img.width(), img.height());
    let has_alpha = img.color().has_alpha();

    match format {
        Format::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut out, quality);
            if matches!(img, DynamicImage::ImageLuma8(_)) {
                let gray = img.to_luma8();
                encoder.write_image(gray.as_raw(), width, height, ExtendedColorType::L8)?;
            } else {
                let rgb = img.to_rgb8();
                encoder.write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)?;
            }
        }
        Format::Png => {
            let encoder =
                PngEncoder::new_with_quality(&mut out, png_compression(quality), FilterType::Adaptive);
            if has_alpha {
                let rgba = img.to_rgba8();
                encoder.write_image(rgba.as_raw(), width, height, ExtendedColorType::Rgba8)?;
            } else {
                let rgb = img.to_rgb8();
                encoder.write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)?;
            }
        }
        Format::Webp => {
            // Lossless only; the quality setting has no effect.
            let encoder = WebPEncoder::new_lossless(&mut out);
            if has_alpha {
                let rgba = img.to_rgba8();
                encoder.write_image(rgba.as_raw(), width, height, ExtendedColorType::Rgba8)?;
            } else {
                let rgb = img.to_rgb8();
                encoder.write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)?;
            }
        }
        Format::Unknown => {
            return Err(image::ImageError::Unsupported(
                image::error::UnsupportedError::from_format_and_kind(
                    image::error::ImageFormatHint::Unknown,
                    image::error::UnsupportedErrorKind::GenericFeature("unknown format".into()),
                ),
            ))
        }
    }
    Ok(out)
}

#[async_trait]
impl Encoder for RasterCodec {
    fn can_encode(&self, format: Format) -> bool {
        image_format(format).is_some()
    }

    async fn encode(&self, scope: &Scope, state: &ImageState, opts: EncodeOptions) -> Result<Bytes> {
        const OP: &str = "encode";
        scope.check(OP)?;
        let format = state.format();
        if !self.can_encode(format) {
            return Err(Error::encode(OP, ErrorKind::UnsupportedFormat(format)));
        }
        let img = match state.decoded() {
            None => return Err(Error::encode(OP, ErrorKind::EmptyInput)),
            Some(_) => state.require_bitmap(OP)?.clone(),
        };
        let quality = if opts.lossless {
            100
        } else {
            opts.quality_or(self.default_quality).clamp(1, 100)
        };

        let out = tokio::task::spawn_blocking(move || encode_blocking(&img, format, quality))
            .await
            .map_err(|e| join_error(OP, e))?
            .map_err(|e| Error::encode(OP, e.into()))?;
        tracing::trace!(bytes = out.len(), quality, %format, "encoded raster image");
        Ok(Bytes::from(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
        }))
    }

    fn decoded(img: DynamicImage, format: Format) -> ImageState {
        ImageState::default()
            .with_decoded(DecodedImage::bitmap(img))
            .with_format(format)
    }

    #[tokio::test]
    async fn jpeg_round_trip_keeps_dimensions() {
        let codec = RasterCodec::default();
        let scope = Scope::new();
        let bytes = codec
            .encode(&scope, &decoded(gradient(64, 48), Format::Jpeg), EncodeOptions::default())
            .await
            .unwrap();
        assert_eq!(detect_format(&bytes), Format::Jpeg);

        let state = codec.decode(&scope, bytes).await.unwrap();
        assert_eq!(state.dimensions(), (64, 48));
        assert_eq!(state.format(), Format::Jpeg);
        assert_eq!(state.metadata().color_space, ColorSpace::Rgb);
    }

    #[tokio::test]
    async fn lower_jpeg_quality_is_smaller() {
        let codec = RasterCodec::default();
        let scope = Scope::new();
        let state = decoded(gradient(128, 128), Format::Jpeg);
        let high = codec
            .encode(&scope, &state, EncodeOptions::with_quality(95))
            .await
            .unwrap();
        let low = codec
            .encode(&scope, &state, EncodeOptions::with_quality(20))
            .await
            .unwrap();
        assert!(low.len() < high.len());
    }

    #[tokio::test]
    async fn png_keeps_alpha() {
        let codec = RasterCodec::default();
        let scope = Scope::new();
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([1, 2, 3, 128])));
        let bytes = codec
            .encode(&scope, &decoded(img, Format::Png), EncodeOptions::default())
            .await
            .unwrap();
        let state = codec.decode(&scope, bytes).await.unwrap();
        assert!(state.metadata().has_alpha);
        assert_eq!(state.metadata().color_space, ColorSpace::Rgba);
    }

    #[tokio::test]
    async fn webp_encodes_lossless() {
        let codec = RasterCodec::default();
        let scope = Scope::new();
        let bytes = codec
            .encode(&scope, &decoded(gradient(16, 16), Format::Webp), EncodeOptions::default())
            .await
            .unwrap();
        assert_eq!(detect_format(&bytes), Format::Webp);
        let state = codec.decode(&scope, bytes).await.unwrap();
        assert_eq!(state.dimensions(), (16, 16));
    }

    #[tokio::test]
    async fn garbage_is_decode_error() {
        let codec = RasterCodec::default();
        let err = codec
            .decode(&Scope::new(), Bytes::from_static(b"definitely not an image"))
            .await
            .unwrap_err();
        assert!(err.is_category(pf_core::Category::Decode));
    }

    #[tokio::test]
    async fn truncated_jpeg_is_decode_error() {
        let codec = RasterCodec::default();
        let err = codec
            .decode(&Scope::new(), Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]))
            .await
            .unwrap_err();
        assert!(err.is_category(pf_core::Category::Decode));
    }

    #[tokio::test]
    async fn encode_requires_decoded_image() {
        let codec = RasterCodec::default();
        let state = ImageState::from_encoded(Bytes::from_static(b"x"), Format::Png);
        let err = codec
            .encode(&Scope::new(), &state, EncodeOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_category(pf_core::Category::Encode));
    }

    #[tokio::test]
    async fn cancelled_scope_skips_work() {
        let codec = RasterCodec::default();
        let scope = Scope::new();
        scope.cancel();
        let err = codec
            .encode(&scope, &decoded(gradient(4, 4), Format::Png), EncodeOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
    }

    #[test]
    fn png_compression_tracks_quality() {
        assert!(matches!(png_compression(10), CompressionType::Best));
        assert!(matches!(png_compression(95), CompressionType::Fast));
    }
}

//! Image-domain enums and the metadata record.
//!
//! Enums serialize in lowercase and implement `Display` manually for a
//! consistent string representation in logs and configuration files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Format
// ---------------------------------------------------------------------------

/// Codec identifier for encoded image bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Jpeg,
    Png,
    Webp,
    #[default]
    Unknown,
}

impl Format {
    /// Map a MIME type to a format. Unrecognised types map to `Unknown`.
    pub fn from_content_type(content_type: &str) -> Self {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" => Self::Jpeg,
            "image/png" => Self::Png,
            "image/webp" => Self::Webp,
            _ => Self::Unknown,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
            Self::Unknown => "application/octet-stream",
        }
    }

    /// Conventional file extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Unknown => "bin",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jpeg => write!(f, "jpeg"),
            Self::Png => write!(f, "png"),
            Self::Webp => write!(f, "webp"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "webp" => Ok(Self::Webp),
            other => Err(format!("unknown image format '{other}' (valid: jpeg, png, webp)")),
        }
    }
}

// ---------------------------------------------------------------------------
// ColorSpace
// ---------------------------------------------------------------------------

/// Colour model of the decoded pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorSpace {
    #[default]
    Rgb,
    Rgba,
    Cmyk,
    Gray,
}

impl fmt::Display for ColorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rgb => write!(f, "rgb"),
            Self::Rgba => write!(f, "rgba"),
            Self::Cmyk => write!(f, "cmyk"),
            Self::Gray => write!(f, "gray"),
        }
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Image information extracted at decode time and updated by transforms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub color_space: ColorSpace,
    pub has_alpha: bool,
    /// Size of the current encoded payload.
    pub size_bytes: u64,
    /// `None` when stripped or absent.
    pub exif: Option<HashMap<String, String>>,
    /// EXIF orientation tag (1-8), 0 when unknown.
    pub orientation: u8,
}

impl Metadata {
    pub fn has_exif(&self) -> bool {
        self.exif.as_ref().is_some_and(|m| !m.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Output dimensions for a resize request.
///
/// A zero target axis is derived from the other axis, preserving the aspect
/// ratio and rounding to the nearest pixel. Both axes zero is a no-op; both
/// axes set are taken as-is.
pub fn scale_dimensions(src_w: u32, src_h: u32, target_w: u32, target_h: u32) -> (u32, u32) {
    match (target_w, target_h) {
        (0, 0) => (src_w, src_h),
        (0, h) if src_h > 0 => {
            let w = (f64::from(src_w) * f64::from(h) / f64::from(src_h)).round();
            (w as u32, h)
        }
        (w, 0) if src_w > 0 => {
            let h = (f64::from(src_h) * f64::from(w) / f64::from(src_w)).round();
            (w, h as u32)
        }
        (w, h) => (w, h),
    }
}

//! Steps that only adjust what a later encode will do.

use async_trait::async_trait;
use pf_core::{EncodeSettings, Error, ErrorKind, Format, ImageState, Result, Scope, Step};

/// Choose the quality the next encode step uses.
#[derive(Debug, Clone, Copy)]
pub struct QualityStep {
    pub quality: u8,
}

impl QualityStep {
    pub fn new(quality: u8) -> Self {
        Self { quality }
    }
}

#[async_trait]
impl Step for QualityStep {
    fn name(&self) -> &str {
        "quality"
    }

    async fn execute(&self, _scope: &Scope, state: &ImageState) -> Result<ImageState> {
        if !(1..=100).contains(&self.quality) {
            return Err(Error::pipeline(
                self.name(),
                ErrorKind::msg(format!("quality must be within 1..=100, got {}", self.quality)),
            ));
        }
        Ok(state.clone().with_encode_settings(EncodeSettings {
            quality: Some(self.quality),
        }))
    }
}

/// Switch the target format for the next encode step.
#[derive(Debug, Clone, Copy)]
pub struct ConvertFormatStep {
    pub format: Format,
}

impl ConvertFormatStep {
    pub fn new(format: Format) -> Self {
        Self { format }
    }
}

#[async_trait]
impl Step for ConvertFormatStep {
    fn name(&self) -> &str {
        "format"
    }

    async fn execute(&self, _scope: &Scope, state: &ImageState) -> Result<ImageState> {
        if self.format == Format::Unknown {
            return Err(Error::pipeline(self.name(), ErrorKind::UnsupportedFormat(self.format)));
        }
        Ok(state.clone().with_format(self.format))
    }
}

/// Drop EXIF data and the orientation tag.
#[derive(Debug, Clone, Copy, Default)]
pub struct StripExifStep;

#[async_trait]
impl Step for StripExifStep {
    fn name(&self) -> &str {
        "strip_exif"
    }

    async fn execute(&self, _scope: &Scope, state: &ImageState) -> Result<ImageState> {
        Ok(state.clone().map_metadata(|m| {
            m.exif = None;
            m.orientation = 0;
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn quality_is_carried_explicitly() {
        let input = ImageState::default();
        let out = QualityStep::new(60).execute(&Scope::new(), &input).await.unwrap();
        assert_eq!(out.encode_settings().quality, Some(60));
        assert_eq!(input.encode_settings().quality, None);
        assert!(out.metadata().exif.is_none());
    }

    #[tokio::test]
    async fn quality_out_of_range_rejected() {
        for q in [0, 101] {
            assert!(QualityStep::new(q)
                .execute(&Scope::new(), &ImageState::default())
                .await
                .is_err());
        }
    }

    #[tokio::test]
    async fn format_conversion() {
        let out = ConvertFormatStep::new(Format::Webp)
            .execute(&Scope::new(), &ImageState::default())
            .await
            .unwrap();
        assert_eq!(out.format(), Format::Webp);
        assert_eq!(out.metadata().format, Format::Webp);

        assert!(ConvertFormatStep::new(Format::Unknown)
            .execute(&Scope::new(), &ImageState::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn strip_exif_clears_metadata() {
        let input = ImageState::default().map_metadata(|m| {
            m.exif = Some(HashMap::from([("Make".into(), "Acme".into())]));
            m.orientation = 6;
        });
        let out = StripExifStep.execute(&Scope::new(), &input).await.unwrap();
        assert!(!out.metadata().has_exif());
        assert_eq!(out.metadata().orientation, 0);
        assert!(input.metadata().has_exif());
    }
}

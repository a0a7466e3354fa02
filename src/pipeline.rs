use image::RgbaImage;
use serde::Serialize;
use tracing::info;

use crate::data::{self, ImageAttachment};
use crate::error::CardError;
use crate::overlay::{BatchReport, FitOptions, GlyphPainter, render_regions};
use crate::regions::DetectedTextRegion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Uploaded,
    Detected,
    Reviewed,
    Cleaned,
    Composited,
}

/// One card moving through upload, detection, review, cleaning and
/// compositing. Transitions consume the state and fail with
/// [`CardError::InvalidStage`] when called out of order.
#[derive(Debug, Clone)]
pub struct PipelineState {
    original: ImageAttachment,
    width: u32,
    height: u32,
    regions: Vec<DetectedTextRegion>,
    cleaned: Option<RgbaImage>,
    output: Option<Vec<u8>>,
    report: Option<BatchReport>,
    stage: Stage,
}

impl PipelineState {
    pub fn uploaded(original: ImageAttachment) -> anyhow::Result<Self> {
        let decoded = original.decode()?;
        let (width, height) = decoded.dimensions();
        if width == 0 || height == 0 {
            return Err(CardError::InvalidImageGeometry {
                width: width as i64,
                height: height as i64,
            }
            .into());
        }
        info!(width, height, "image uploaded");
        Ok(Self {
            original,
            width,
            height,
            regions: Vec::new(),
            cleaned: None,
            output: None,
            report: None,
            stage: Stage::Uploaded,
        })
    }

    pub fn detected(self, regions: Vec<DetectedTextRegion>) -> Result<Self, CardError> {
        self.require_stage(&[Stage::Uploaded], "uploaded")?;
        info!(regions = regions.len(), "regions detected");
        Ok(Self {
            regions,
            stage: Stage::Detected,
            ..self
        })
    }

    /// Replaces the regions with the reviewed table. May be repeated.
    pub fn reviewed(self, regions: Vec<DetectedTextRegion>) -> Result<Self, CardError> {
        self.require_stage(&[Stage::Detected, Stage::Reviewed], "detected or reviewed")?;
        info!(regions = regions.len(), "regions reviewed");
        Ok(Self {
            regions,
            stage: Stage::Reviewed,
            ..self
        })
    }

    pub fn cleaned(self, background: RgbaImage) -> Result<Self, CardError> {
        self.require_stage(&[Stage::Reviewed], "reviewed")?;
        let actual = background.dimensions();
        if actual != (self.width, self.height) {
            return Err(CardError::DimensionMismatch {
                expected: (self.width, self.height),
                actual,
            });
        }
        info!("background cleaned");
        Ok(Self {
            cleaned: Some(background),
            stage: Stage::Cleaned,
            ..self
        })
    }

    /// Renders the regions onto the cleaned background. Can be rerun with a
    /// different font once composited.
    pub fn composited<F: GlyphPainter + ?Sized>(
        self,
        font: &F,
        options: &FitOptions,
    ) -> anyhow::Result<Self> {
        self.require_stage(&[Stage::Cleaned, Stage::Composited], "cleaned or composited")?;
        let Some(background) = self.cleaned.as_ref() else {
            return Err(CardError::InvalidStage {
                expected: "cleaned",
                actual: self.stage,
            }
            .into());
        };
        let (image, report) = render_regions(background, &self.regions, font, options);
        let output = data::encode_png(&image)?;
        info!(
            rendered = report.rendered.len(),
            skipped = report.skipped.len(),
            overflowed = report.overflowed.len(),
            "card composited"
        );
        Ok(Self {
            output: Some(output),
            report: Some(report),
            stage: Stage::Composited,
            ..self
        })
    }

    fn require_stage(&self, allowed: &[Stage], expected: &'static str) -> Result<(), CardError> {
        if allowed.contains(&self.stage) {
            Ok(())
        } else {
            Err(CardError::InvalidStage {
                expected,
                actual: self.stage,
            })
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn original(&self) -> &ImageAttachment {
        &self.original
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn regions(&self) -> &[DetectedTextRegion] {
        &self.regions
    }

    pub fn cleaned_background(&self) -> Option<&RgbaImage> {
        self.cleaned.as_ref()
    }

    pub fn output(&self) -> Option<&[u8]> {
        self.output.as_deref()
    }

    pub fn report(&self) -> Option<&BatchReport> {
        self.report.as_ref()
    }
}

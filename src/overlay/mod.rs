mod font;
mod layout;
mod render;

use serde::Serialize;

use crate::error::CardError;

pub use font::{FontFace, load_font_face, load_font_face_from_data, load_system_font_face};
pub use layout::{
    FitOptions, FitOutcome, FittedLayout, candidate_sizes, fit, line_spacing_for, wrap_chars,
};
pub use render::{PlacedLayout, annotate, composite, render_regions};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TextExtent {
    pub width: f32,
    pub height: f32,
}

/// Measures strings at a pixel size. Implementations must be deterministic.
pub trait TextMeasure {
    fn measure(&self, text: &str, font_size: f32) -> TextExtent;
}

/// A font that can also produce outlines for drawing.
pub trait GlyphPainter: TextMeasure {
    /// Outline of `text` set on one line, with the line box's top-left corner
    /// at the origin and y growing downwards.
    fn line_path(&self, text: &str, font_size: f32) -> Option<tiny_skia::Path>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    EmptyText,
    DegenerateBox,
    MissingBox,
    InvalidBox,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SkipReason::EmptyText => "translated text is empty",
            SkipReason::DegenerateBox => "box has zero or negative area",
            SkipReason::MissingBox => "no box was reported",
            SkipReason::InvalidBox => "box is not four numbers",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRegion {
    pub index: usize,
    pub reason: SkipReason,
}

impl From<&SkippedRegion> for CardError {
    fn from(skipped: &SkippedRegion) -> Self {
        CardError::DegenerateRegion {
            index: skipped.index,
            reason: skipped.reason.to_string(),
        }
    }
}

/// Per-batch outcome of rendering; region indices refer to input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub rendered: Vec<usize>,
    pub skipped: Vec<SkippedRegion>,
    pub overflowed: Vec<usize>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.overflowed.is_empty()
    }
}

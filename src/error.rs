use thiserror::Error;

use crate::pipeline::Stage;

/// Failures of the card pipeline that callers are expected to branch on.
///
/// Region-level problems (`DegenerateRegion`) are never returned from a batch
/// operation; they are collected into a [`crate::overlay::BatchReport`].
#[derive(Debug, Error)]
pub enum CardError {
    #[error("invalid image geometry: {width}x{height}")]
    InvalidImageGeometry { width: i64, height: i64 },

    #[error("region {index} skipped: {reason}")]
    DegenerateRegion { index: usize, reason: String },

    #[error("font '{font}' unavailable: {reason}")]
    FontUnavailable { font: String, reason: String },

    #[error("cleaned background is {actual:?}, expected {expected:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("pipeline is at stage {actual:?}, expected {expected}")]
    InvalidStage { expected: &'static str, actual: Stage },

    #[error("detection failed: {0}")]
    Detection(String),

    #[error("background cleaning failed: {0}")]
    Cleaning(String),
}

impl CardError {
    pub fn font_unavailable(font: &str, reason: impl std::fmt::Display) -> Self {
        CardError::FontUnavailable {
            font: font.to_string(),
            reason: reason.to_string(),
        }
    }
}

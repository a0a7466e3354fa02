use serde::{Deserialize, Serialize};

use crate::overlay::{BatchReport, SkippedRegion};
use crate::providers::ProviderUsage;
use crate::regions::DetectionRecord;

#[derive(Debug, Deserialize)]
pub(crate) struct DetectRequest {
    pub(crate) image_base64: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct DetectResponse {
    pub(crate) width: u32,
    pub(crate) height: u32,
    /// Rows for the review table, boxes in pixels.
    pub(crate) regions: Vec<DetectionRecord>,
    pub(crate) rejected: Vec<SkippedRegion>,
    pub(crate) preview_base64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) usage: Option<ProviderUsage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CleanRequest {
    pub(crate) image_base64: String,
    #[serde(default)]
    pub(crate) regions: Vec<DetectionRecord>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CleanResponse {
    pub(crate) image_base64: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompositeRequest {
    pub(crate) background_base64: String,
    #[serde(default)]
    pub(crate) regions: Vec<DetectionRecord>,
    pub(crate) font: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CompositeResponse {
    pub(crate) image_base64: String,
    pub(crate) report: BatchReport,
    pub(crate) rejected: Vec<SkippedRegion>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}

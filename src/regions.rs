use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::CardError;
use crate::geometry::{BoxScale, PixelRect, to_pixel_rect};
use crate::overlay::{SkipReason, SkippedRegion};

pub const DEFAULT_FONT_STYLE: &str = "sans-serif";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl RgbColor {
    pub const BLACK: RgbColor = RgbColor { r: 0, g: 0, b: 0 };

    /// Accepts `#rgb`, `#rrggbb`, with or without the leading `#`.
    pub fn parse(value: &str) -> Option<Self> {
        let hex = value.trim().trim_start_matches('#');
        let expanded: String = match hex.len() {
            3 => hex.chars().flat_map(|ch| [ch, ch]).collect(),
            6 => hex.to_string(),
            _ => return None,
        };
        let channel = |idx: usize| u8::from_str_radix(expanded.get(idx..idx + 2)?, 16).ok();
        Some(RgbColor {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
        })
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    pub fn to_rgba(&self) -> image::Rgba<u8> {
        image::Rgba([self.r, self.g, self.b, 255])
    }
}

/// One detected text region after validation at the system boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedTextRegion {
    pub original_text: Option<String>,
    pub translated_text: String,
    pub rect: PixelRect,
    pub color: RgbColor,
    pub font_style: Option<String>,
}

/// Wire shape of a region, as returned by the detector or stored in the
/// editable review table. Every field is optional; validation happens in
/// [`build_regions`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
    #[serde(alias = "text")]
    pub translated_text: Option<String>,
    #[serde(alias = "box")]
    pub box_normalized: Option<Value>,
    #[serde(alias = "color")]
    pub hex_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_style: Option<String>,
}

pub struct BuiltRegions {
    pub regions: Vec<DetectedTextRegion>,
    pub rejected: Vec<SkippedRegion>,
}

/// Validates detector records into regions, mapping boxes with `scale`.
///
/// Records with a missing or malformed box are rejected and reported; empty
/// text is kept so that the review step can still fill it in.
pub fn build_regions(
    records: &[DetectionRecord],
    scale: BoxScale,
    image_width: u32,
    image_height: u32,
) -> Result<BuiltRegions, CardError> {
    let mut regions = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();
    for (index, record) in records.iter().enumerate() {
        let Some(raw_box) = record.box_normalized.as_ref() else {
            warn!("region {} has no box; skipping", index);
            rejected.push(SkippedRegion {
                index,
                reason: SkipReason::MissingBox,
            });
            continue;
        };
        let Some(numbers) = parse_box(raw_box) else {
            warn!("region {} has a malformed box {}; skipping", index, raw_box);
            rejected.push(SkippedRegion {
                index,
                reason: SkipReason::InvalidBox,
            });
            continue;
        };
        let rect = to_pixel_rect(numbers, scale, image_width as i64, image_height as i64)?;
        regions.push(DetectedTextRegion {
            original_text: record
                .original_text
                .clone()
                .filter(|text| !text.trim().is_empty()),
            translated_text: record.translated_text.clone().unwrap_or_default(),
            rect,
            color: resolve_color(index, record.hex_color.as_deref()),
            font_style: record
                .font_style
                .clone()
                .filter(|style| !style.trim().is_empty()),
        });
    }
    Ok(BuiltRegions { regions, rejected })
}

/// Converts regions back into review-table rows with absolute pixel boxes,
/// readable again with [`BoxScale::Pixels`].
pub fn to_records(regions: &[DetectedTextRegion]) -> Vec<DetectionRecord> {
    regions
        .iter()
        .map(|region| DetectionRecord {
            original_text: region.original_text.clone(),
            translated_text: Some(region.translated_text.clone()),
            box_normalized: Some(Value::from(region.rect.to_array().to_vec())),
            hex_color: Some(region.color.to_hex()),
            font_style: Some(
                region
                    .font_style
                    .clone()
                    .unwrap_or_else(|| DEFAULT_FONT_STYLE.to_string()),
            ),
        })
        .collect()
}

fn parse_box(value: &Value) -> Option<[f64; 4]> {
    let items = value.as_array()?;
    if items.len() != 4 {
        return None;
    }
    let mut out = [0.0; 4];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = match item {
            Value::Number(number) => number.as_f64()?,
            Value::String(text) => text.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        if !slot.is_finite() {
            return None;
        }
    }
    Some(out)
}

fn resolve_color(index: usize, value: Option<&str>) -> RgbColor {
    let Some(value) = value.filter(|value| !value.trim().is_empty()) else {
        return RgbColor::BLACK;
    };
    RgbColor::parse(value).unwrap_or_else(|| {
        warn!(
            "region {} has unparsable color '{}'; using black",
            index, value
        );
        RgbColor::BLACK
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_json_snapshot;
    use serde_json::json;

    #[test]
    fn parses_hex_colors() {
        assert_eq!(
            RgbColor::parse("#1a2B3c"),
            Some(RgbColor {
                r: 0x1a,
                g: 0x2b,
                b: 0x3c
            })
        );
        assert_eq!(
            RgbColor::parse("f80"),
            Some(RgbColor {
                r: 0xff,
                g: 0x88,
                b: 0x00
            })
        );
        assert_eq!(RgbColor::parse("#12345"), None);
        assert_eq!(RgbColor::parse("#zzzzzz"), None);
        assert_eq!(RgbColor::parse("#ffé"), None);
    }

    #[test]
    fn lenient_records_fill_defaults() {
        let records: Vec<DetectionRecord> = serde_json::from_value(json!([
            {
                "original_text": "简体",
                "translated_text": "簡體",
                "box_normalized": [100, 200, 300, 400],
                "hex_color": "#ff0000",
                "font_style": "serif"
            },
            { "text": "無色", "box": ["10", 20, "30", 40.0] },
            { "translated_text": "壞色", "box_normalized": [0, 0, 10, 10], "hex_color": "red" },
            { "translated_text": "無框" },
            { "translated_text": "三個數", "box_normalized": [1, 2, 3] }
        ]))
        .unwrap();

        let built = build_regions(&records, BoxScale::PerMille, 1000, 500).unwrap();
        assert_eq!(built.regions.len(), 3);
        assert_eq!(built.regions[0].rect, PixelRect::new(200, 50, 400, 150));
        assert_eq!(built.regions[0].color.to_hex(), "#ff0000");
        assert_eq!(built.regions[0].font_style.as_deref(), Some("serif"));
        assert_eq!(built.regions[1].translated_text, "無色");
        assert_eq!(built.regions[1].color, RgbColor::BLACK);
        assert_eq!(built.regions[2].color, RgbColor::BLACK);

        let reasons: Vec<_> = built
            .rejected
            .iter()
            .map(|skip| (skip.index, skip.reason.clone()))
            .collect();
        assert_eq!(
            reasons,
            vec![(3, SkipReason::MissingBox), (4, SkipReason::InvalidBox)]
        );
    }

    #[test]
    fn invalid_geometry_is_fatal() {
        let records = vec![DetectionRecord {
            translated_text: Some("字".to_string()),
            box_normalized: Some(json!([0, 0, 1, 1])),
            ..Default::default()
        }];
        let err = build_regions(&records, BoxScale::Unit, 0, 10)
            .err()
            .expect("geometry error");
        assert!(matches!(err, CardError::InvalidImageGeometry { .. }));
    }

    #[test]
    fn review_rows_snapshot() {
        let regions = vec![DetectedTextRegion {
            original_text: Some("线索卡".to_string()),
            translated_text: "線索卡".to_string(),
            rect: PixelRect::new(12, 30, 220, 78),
            color: RgbColor {
                r: 0x33,
                g: 0x22,
                b: 0x11,
            },
            font_style: None,
        }];
        assert_json_snapshot!(to_records(&regions), @r###"
        [
          {
            "original_text": "线索卡",
            "translated_text": "線索卡",
            "box_normalized": [
              12,
              30,
              220,
              78
            ],
            "hex_color": "#332211",
            "font_style": "sans-serif"
          }
        ]
        "###);
    }

    #[test]
    fn review_rows_read_back_as_pixels() {
        let regions = vec![DetectedTextRegion {
            original_text: None,
            translated_text: "回讀".to_string(),
            rect: PixelRect::new(5, 6, 70, 80),
            color: RgbColor::BLACK,
            font_style: Some("serif".to_string()),
        }];
        let records = to_records(&regions);
        let built = build_regions(&records, BoxScale::Pixels, 100, 100).unwrap();
        assert_eq!(built.regions, regions);
        assert!(built.rejected.is_empty());
    }
}

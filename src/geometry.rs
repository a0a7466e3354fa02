use serde::{Deserialize, Serialize};

use crate::error::CardError;

/// Axis-aligned rectangle in absolute pixels. Edges are inclusive on the
/// left/top and exclusive on the right/bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl PixelRect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Saturates instead of overflowing for boxes spanning the whole `i32`
    /// range.
    pub fn width(&self) -> i32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> i32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn is_degenerate(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    /// `[left, top, right, bottom]`, the order the review table uses.
    pub fn to_array(&self) -> [i32; 4] {
        [self.left, self.top, self.right, self.bottom]
    }

    /// Intersection with an image of the given size, or `None` when nothing
    /// of the rect lies on the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<PixelRect> {
        let clamped = PixelRect {
            left: self.left.clamp(0, width as i32),
            top: self.top.clamp(0, height as i32),
            right: self.right.clamp(0, width as i32),
            bottom: self.bottom.clamp(0, height as i32),
        };
        if clamped.is_degenerate() {
            None
        } else {
            Some(clamped)
        }
    }
}

/// Unit of the four numbers a detector reports for a box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxScale {
    /// `(ymin, xmin, ymax, xmax)` in thousandths of the image size.
    #[default]
    PerMille,
    /// `(ymin, xmin, ymax, xmax)` as fractions of the image size.
    Unit,
    /// `(left, top, right, bottom)` already in pixels.
    Pixels,
}

impl BoxScale {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "per_mille" | "permille" | "1000" => Some(BoxScale::PerMille),
            "unit" | "1" => Some(BoxScale::Unit),
            "pixels" | "px" | "absolute" => Some(BoxScale::Pixels),
            _ => None,
        }
    }

    fn divisor(&self) -> Option<f64> {
        match self {
            BoxScale::PerMille => Some(1000.0),
            BoxScale::Unit => Some(1.0),
            BoxScale::Pixels => None,
        }
    }
}

pub fn to_pixel_rect(
    normalized: [f64; 4],
    scale: BoxScale,
    image_width: i64,
    image_height: i64,
) -> Result<PixelRect, CardError> {
    if image_width <= 0 || image_height <= 0 {
        return Err(CardError::InvalidImageGeometry {
            width: image_width,
            height: image_height,
        });
    }

    let Some(divisor) = scale.divisor() else {
        let [left, top, right, bottom] = normalized;
        return Ok(PixelRect::new(
            round_px(left),
            round_px(top),
            round_px(right),
            round_px(bottom),
        ));
    };

    let [ymin, xmin, ymax, xmax] = normalized;
    let w = image_width as f64;
    let h = image_height as f64;
    Ok(PixelRect::new(
        round_px(xmin / divisor * w),
        round_px(ymin / divisor * h),
        round_px(xmax / divisor * w),
        round_px(ymax / divisor * h),
    ))
}

fn round_px(value: f64) -> i32 {
    value.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

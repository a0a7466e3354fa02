use serde::Serialize;
use tracing::debug;

use super::{SkipReason, TextMeasure};
use crate::geometry::PixelRect;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    /// Pixels removed from the candidate size per attempt.
    pub step: f32,
    /// Smallest size tried; the layout at this size is accepted even if it
    /// overflows.
    pub min_size: f32,
    pub line_spacing_ratio: f32,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            step: 2.0,
            min_size: 8.0,
            line_spacing_ratio: 0.2,
        }
    }
}

impl FitOptions {
    fn sanitized(&self) -> FitOptions {
        let defaults = FitOptions::default();
        FitOptions {
            step: if self.step.is_finite() && self.step > 0.0 {
                self.step
            } else {
                defaults.step
            },
            min_size: if self.min_size.is_finite() && self.min_size > 0.0 {
                self.min_size
            } else {
                defaults.min_size
            },
            line_spacing_ratio: if self.line_spacing_ratio.is_finite()
                && self.line_spacing_ratio >= 0.0
            {
                self.line_spacing_ratio
            } else {
                defaults.line_spacing_ratio
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FittedLayout {
    pub font_size: f32,
    pub lines: Vec<String>,
    pub line_height: f32,
    pub line_spacing: f32,
    pub block_height: f32,
    /// Set when even the minimum size does not fit the box.
    pub overflow: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FitOutcome {
    Fitted(FittedLayout),
    Skip(SkipReason),
}

impl FitOutcome {
    pub fn layout(&self) -> Option<&FittedLayout> {
        match self {
            FitOutcome::Fitted(layout) => Some(layout),
            FitOutcome::Skip(_) => None,
        }
    }
}

/// Sizes tried for a box of height `initial`: strictly decreasing by `step`
/// while above the floor, then the floor itself.
///
/// Where `f32` can no longer represent `current - step` the walk drops
/// straight to the floor.
pub fn candidate_sizes(initial: f32, options: &FitOptions) -> impl Iterator<Item = f32> {
    let options = options.sanitized();
    let floor = options.min_size;
    let start = if initial.is_finite() && initial > floor {
        initial
    } else {
        floor
    };
    let mut next = Some(start);
    std::iter::from_fn(move || {
        let current = next?;
        next = if current > floor {
            let stepped = current - options.step;
            Some(if stepped > floor && stepped < current {
                stepped
            } else {
                floor
            })
        } else {
            None
        };
        Some(current)
    })
}

pub fn line_spacing_for(font_size: f32, options: &FitOptions) -> f32 {
    (font_size * options.sanitized().line_spacing_ratio).round()
}

/// Greedy character-level wrapping. A character that alone exceeds
/// `max_width` still gets its own line.
pub fn wrap_chars<M: TextMeasure + ?Sized>(
    text: &str,
    max_width: f32,
    font_size: f32,
    font: &M,
) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if current.is_empty() {
            current.push(ch);
            continue;
        }
        current.push(ch);
        if font.measure(&current, font_size).width > max_width {
            current.pop();
            lines.push(std::mem::take(&mut current));
            current.push(ch);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

pub fn fit<M: TextMeasure + ?Sized>(
    text: &str,
    rect: PixelRect,
    font: &M,
    options: &FitOptions,
) -> FitOutcome {
    if rect.is_degenerate() {
        return FitOutcome::Skip(SkipReason::DegenerateBox);
    }
    if text.is_empty() {
        return FitOutcome::Skip(SkipReason::EmptyText);
    }

    let box_width = rect.width() as f32;
    let box_height = rect.height() as f32;
    let mut last = None;
    for font_size in candidate_sizes(box_height, options) {
        let candidate = layout_at(text, font_size, box_width, font, options);
        let fits_width = candidate.max_width <= box_width;
        let fits_height = candidate.layout.block_height <= box_height;
        debug!(
            font_size,
            lines = candidate.layout.lines.len(),
            block_height = candidate.layout.block_height,
            "fit candidate"
        );
        if fits_width && fits_height {
            return FitOutcome::Fitted(candidate.layout);
        }
        last = Some(candidate.layout);
    }

    let mut layout = last.unwrap_or_else(|| {
        layout_at(text, options.sanitized().min_size, box_width, font, options).layout
    });
    layout.overflow = true;
    FitOutcome::Fitted(layout)
}

struct Candidate {
    layout: FittedLayout,
    max_width: f32,
}

fn layout_at<M: TextMeasure + ?Sized>(
    text: &str,
    font_size: f32,
    box_width: f32,
    font: &M,
    options: &FitOptions,
) -> Candidate {
    let lines = wrap_chars(text, box_width, font_size, font);
    let line_spacing = line_spacing_for(font_size, options);
    let mut line_height: f32 = 0.0;
    let mut max_width: f32 = 0.0;
    let mut block_height = 0.0;
    for line in &lines {
        let extent = font.measure(line, font_size);
        line_height = line_height.max(extent.height);
        max_width = max_width.max(extent.width);
        block_height += extent.height;
    }
    if lines.len() > 1 {
        block_height += line_spacing * (lines.len() - 1) as f32;
    }
    Candidate {
        layout: FittedLayout {
            font_size,
            lines,
            line_height,
            line_spacing,
            block_height,
            overflow: false,
        },
        max_width,
    }
}

use image::{Rgba, RgbaImage};
use tiny_skia::{FillRule, Paint, Pixmap, Transform};
use tracing::{info, warn};

use super::layout::{FitOptions, FitOutcome, FittedLayout, fit};
use super::{BatchReport, GlyphPainter, SkippedRegion};
use crate::geometry::PixelRect;
use crate::regions::{DetectedTextRegion, RgbColor};

const ANNOTATION_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
const ANNOTATION_WIDTH: i32 = 3;

#[derive(Debug, Clone)]
pub struct PlacedLayout {
    pub rect: PixelRect,
    pub layout: FittedLayout,
    pub color: RgbColor,
}

/// Draws every layout onto a copy of `background`, in order. Ink is clipped
/// to each layout's rect.
pub fn composite<F: GlyphPainter + ?Sized>(
    background: &RgbaImage,
    items: &[PlacedLayout],
    font: &F,
) -> RgbaImage {
    let mut output = background.clone();
    for item in items {
        draw_layout(&mut output, item, font);
    }
    output
}

/// Fits and draws every region. Regions that cannot be fitted are skipped
/// and reported; the rest of the batch still renders.
pub fn render_regions<F: GlyphPainter + ?Sized>(
    background: &RgbaImage,
    regions: &[DetectedTextRegion],
    font: &F,
    options: &FitOptions,
) -> (RgbaImage, BatchReport) {
    let mut report = BatchReport::default();
    let mut placed = Vec::with_capacity(regions.len());
    for (index, region) in regions.iter().enumerate() {
        // Only the part of a box that lies on the image can show text; a box
        // entirely off the image has no area left to fit into.
        let rect = region
            .rect
            .clamp_to(background.width(), background.height())
            .unwrap_or(PixelRect::new(0, 0, 0, 0));
        match fit(&region.translated_text, rect, font, options) {
            FitOutcome::Fitted(layout) => {
                if layout.overflow {
                    warn!(
                        "region {} overflows its box at minimum size {}",
                        index, layout.font_size
                    );
                    report.overflowed.push(index);
                }
                report.rendered.push(index);
                placed.push(PlacedLayout {
                    rect,
                    layout,
                    color: region.color,
                });
            }
            FitOutcome::Skip(reason) => {
                warn!("region {} skipped: {}", index, reason);
                report.skipped.push(SkippedRegion { index, reason });
            }
        }
    }
    info!(
        rendered = report.rendered.len(),
        skipped = report.skipped.len(),
        overflowed = report.overflowed.len(),
        "composited regions"
    );
    (composite(background, &placed, font), report)
}

/// Outlines each rect in red on a copy of `image`, the stroke lying inside
/// the rect.
pub fn annotate(image: &RgbaImage, rects: &[PixelRect]) -> RgbaImage {
    let mut output = image.clone();
    for rect in rects {
        let Some(clip) = rect.clamp_to(output.width(), output.height()) else {
            continue;
        };
        for y in clip.top..clip.bottom {
            for x in clip.left..clip.right {
                let on_edge = x.saturating_sub(rect.left) < ANNOTATION_WIDTH
                    || rect.right.saturating_sub(x) <= ANNOTATION_WIDTH
                    || y.saturating_sub(rect.top) < ANNOTATION_WIDTH
                    || rect.bottom.saturating_sub(y) <= ANNOTATION_WIDTH;
                if on_edge {
                    output.put_pixel(x as u32, y as u32, ANNOTATION_COLOR);
                }
            }
        }
    }
    output
}

fn draw_layout<F: GlyphPainter + ?Sized>(image: &mut RgbaImage, item: &PlacedLayout, font: &F) {
    if item.layout.lines.is_empty() {
        return;
    }
    let Some(clip) = item.rect.clamp_to(image.width(), image.height()) else {
        warn!("region at {:?} lies outside the image", item.rect.to_array());
        return;
    };
    let Some(mut pixmap) = Pixmap::new(clip.width() as u32, clip.height() as u32) else {
        return;
    };
    let mut paint = Paint::default();
    paint.set_color_rgba8(item.color.r, item.color.g, item.color.b, 255);
    paint.anti_alias = true;

    let layout = &item.layout;
    let offset_x = (item.rect.left as f32) - (clip.left as f32);
    let mut top = (item.rect.top as f32) - (clip.top as f32);
    for line in &layout.lines {
        if let Some(path) = font.line_path(line, layout.font_size) {
            let transform = Transform::from_translate(offset_x, top);
            pixmap.fill_path(&path, &paint, FillRule::Winding, transform, None);
        }
        top += layout.line_height + layout.line_spacing;
    }
    blend_pixmap(image, &pixmap, clip);
}

/// Source-over blend of a premultiplied pixmap onto a straight-alpha image.
fn blend_pixmap(image: &mut RgbaImage, pixmap: &Pixmap, at: PixelRect) {
    let width = pixmap.width();
    for (idx, src) in pixmap.pixels().iter().enumerate() {
        let src_a = src.alpha() as u32;
        if src_a == 0 {
            continue;
        }
        let x = at.left as u32 + idx as u32 % width;
        let y = at.top as u32 + idx as u32 / width;
        let dst = image.get_pixel_mut(x, y);
        let dst_a = dst.0[3] as u32;
        let inv = 255 - src_a;
        let out_a = src_a + div255(dst_a * inv);
        if out_a == 0 {
            continue;
        }
        let src_c = [src.red(), src.green(), src.blue()];
        for channel in 0..3 {
            let dst_premul = div255(dst.0[channel] as u32 * dst_a);
            let out_premul = src_c[channel] as u32 + div255(dst_premul * inv);
            dst.0[channel] = ((out_premul * 255 + out_a / 2) / out_a).min(255) as u8;
        }
        dst.0[3] = out_a.min(255) as u8;
    }
}

fn div255(value: u32) -> u32 {
    (value + 127) / 255
}

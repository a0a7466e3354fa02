use anyhow::{Context, Result, anyhow};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tiny_skia::PathBuilder;
use ttf_parser::{Face, name_id};
use usvg::fontdb;

use super::{GlyphPainter, TextExtent, TextMeasure};

/// A parsed font face. Cloning is cheap; the font bytes and the advance
/// cache are shared.
#[derive(Clone)]
pub struct FontFace {
    data: Arc<Vec<u8>>,
    advances: Arc<Mutex<HashMap<char, u16>>>,
    face_index: u32,
    units_per_em: u16,
    ascender: i16,
    descender: i16,
    space_advance: u16,
    family: Option<String>,
}

impl std::fmt::Debug for FontFace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontFace")
            .field("family", &self.family)
            .field("face_index", &self.face_index)
            .field("units_per_em", &self.units_per_em)
            .finish()
    }
}

impl FontFace {
    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    fn scale(&self, font_size: f32) -> f32 {
        font_size / self.units_per_em.max(1) as f32
    }

    fn ascent_px(&self, font_size: f32) -> f32 {
        self.ascender as f32 * self.scale(font_size)
    }

    fn line_height_px(&self, font_size: f32) -> f32 {
        (self.ascender as f32 - self.descender as f32) * self.scale(font_size)
    }

    fn face(&self) -> Option<Face<'_>> {
        Face::parse(&self.data, self.face_index).ok()
    }

    /// Sum of horizontal advances in font units. The face is only parsed
    /// when a character has not been seen before.
    fn advance_units(&self, text: &str) -> u32 {
        let mut cache = self
            .advances
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut face = None;
        let mut total = 0u32;
        for ch in text.chars() {
            let advance = match cache.get(&ch) {
                Some(advance) => *advance,
                None => {
                    if face.is_none() {
                        face = self.face();
                    }
                    let advance = face
                        .as_ref()
                        .and_then(|face| {
                            face.glyph_index(ch)
                                .and_then(|glyph| face.glyph_hor_advance(glyph))
                        })
                        .unwrap_or(self.space_advance);
                    cache.insert(ch, advance);
                    advance
                }
            };
            total = total.saturating_add(advance as u32);
        }
        total
    }
}

impl TextMeasure for FontFace {
    fn measure(&self, text: &str, font_size: f32) -> TextExtent {
        if text.is_empty() {
            return TextExtent::default();
        }
        TextExtent {
            width: self.advance_units(text) as f32 * self.scale(font_size),
            height: self.line_height_px(font_size),
        }
    }
}

impl GlyphPainter for FontFace {
    fn line_path(&self, text: &str, font_size: f32) -> Option<tiny_skia::Path> {
        let face = self.face()?;
        let scale = self.scale(font_size);
        let baseline = self.ascent_px(font_size);
        let mut builder = OutlineSink {
            builder: PathBuilder::new(),
            scale,
            origin_x: 0.0,
            baseline,
        };
        for ch in text.chars() {
            let glyph = face.glyph_index(ch);
            if let Some(glyph) = glyph {
                let _ = face.outline_glyph(glyph, &mut builder);
            }
            let advance = glyph
                .and_then(|glyph| face.glyph_hor_advance(glyph))
                .unwrap_or(self.space_advance);
            builder.origin_x += advance as f32 * scale;
        }
        builder.builder.finish()
    }
}

/// Converts font units (y up) into pixel space (y down) relative to the top
/// of the line box.
struct OutlineSink {
    builder: PathBuilder,
    scale: f32,
    origin_x: f32,
    baseline: f32,
}

impl OutlineSink {
    fn point(&self, x: f32, y: f32) -> (f32, f32) {
        (self.origin_x + x * self.scale, self.baseline - y * self.scale)
    }
}

impl ttf_parser::OutlineBuilder for OutlineSink {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.point(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.point(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.point(x1, y1);
        let (x, y) = self.point(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.point(x1, y1);
        let (x2, y2) = self.point(x2, y2);
        let (x, y) = self.point(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

pub fn load_font_face(path: &Path) -> Result<FontFace> {
    let data =
        std::fs::read(path).with_context(|| format!("failed to read font: {}", path.display()))?;
    load_font_face_from_data(data, None)
        .map_err(|err| anyhow!("failed to parse font: {} ({})", path.display(), err))
}

/// Parses the first face of `data`, or the face whose family matches
/// `preferred_family` when the data is a collection.
pub fn load_font_face_from_data(data: Vec<u8>, preferred_family: Option<&str>) -> Result<FontFace> {
    let data = Arc::new(data);
    let mut fallback = None;
    let count = ttf_parser::fonts_in_collection(&data).unwrap_or(1);
    for index in 0..count {
        let Ok(face) = Face::parse(&data, index) else {
            continue;
        };
        let units_per_em = face.units_per_em().max(1);
        let font = FontFace {
            data: data.clone(),
            advances: Arc::new(Mutex::new(HashMap::new())),
            face_index: index,
            units_per_em,
            ascender: face.ascender(),
            descender: face.descender(),
            space_advance: face
                .glyph_index(' ')
                .and_then(|id| face.glyph_hor_advance(id))
                .unwrap_or(units_per_em / 2),
            family: extract_family_name(&face),
        };
        if let (Some(preferred), Some(found)) = (preferred_family, font.family())
            && found.eq_ignore_ascii_case(preferred)
        {
            return Ok(font);
        }
        if fallback.is_none() {
            fallback = Some(font);
        }
    }
    fallback.ok_or_else(|| anyhow!("failed to parse font data"))
}

/// Looks a family up among the installed system fonts.
pub fn load_system_font_face(family: &str) -> Result<FontFace> {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    let is_sans =
        family.eq_ignore_ascii_case("sans-serif") || family.eq_ignore_ascii_case("sans");
    let families = if is_sans {
        vec![fontdb::Family::SansSerif]
    } else if family.eq_ignore_ascii_case("serif") {
        vec![fontdb::Family::Serif]
    } else {
        vec![fontdb::Family::Name(family)]
    };
    let query = fontdb::Query {
        families: &families,
        ..Default::default()
    };
    let id = db
        .query(&query)
        .ok_or_else(|| anyhow!("font not found: {}", family))?;
    let data = db
        .with_face_data(id, |data, _index| data.to_vec())
        .ok_or_else(|| anyhow!("failed to load font data: {}", family))?;
    let preferred = if is_sans { None } else { Some(family) };
    load_font_face_from_data(data, preferred)
}

fn extract_family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}

#![cfg(test)]

use crate::overlay::{GlyphPainter, TextExtent, TextMeasure};

pub(crate) fn with_temp_home<F, R>(func: F) -> R
where
    F: FnOnce(&std::path::Path) -> R,
{
    static HOME_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
    let _guard = HOME_MUTEX.lock().unwrap_or_else(|err| err.into_inner());
    let dir = tempfile::tempdir().expect("tempdir");
    let old_home = std::env::var("HOME").ok();
    let old_base = std::env::var(crate::paths::BASE_DIR_ENV).ok();
    // SAFETY: tests touching the environment are serialized by HOME_MUTEX.
    unsafe {
        std::env::set_var("HOME", dir.path());
        std::env::remove_var(crate::paths::BASE_DIR_ENV);
    }
    let result = func(dir.path());
    unsafe {
        match old_home {
            Some(old) => std::env::set_var("HOME", old),
            None => std::env::remove_var("HOME"),
        }
        if let Some(old) = old_base {
            std::env::set_var(crate::paths::BASE_DIR_ENV, old);
        }
    }
    result
}

/// Monospaced fake font: every character is `width_ratio * size` wide and
/// `height_ratio * size` tall, drawn as a solid block.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FixedFont {
    width_ratio: f32,
    height_ratio: f32,
}

impl FixedFont {
    pub(crate) fn new(width_ratio: f32, height_ratio: f32) -> Self {
        Self {
            width_ratio,
            height_ratio,
        }
    }
}

impl TextMeasure for FixedFont {
    fn measure(&self, text: &str, font_size: f32) -> TextExtent {
        let count = text.chars().count() as f32;
        TextExtent {
            width: count * self.width_ratio * font_size,
            height: if count > 0.0 {
                self.height_ratio * font_size
            } else {
                0.0
            },
        }
    }
}

impl GlyphPainter for FixedFont {
    fn line_path(&self, text: &str, font_size: f32) -> Option<tiny_skia::Path> {
        let advance = self.width_ratio * font_size;
        let height = self.height_ratio * font_size;
        let mut builder = tiny_skia::PathBuilder::new();
        for (idx, ch) in text.chars().enumerate() {
            if ch.is_whitespace() {
                continue;
            }
            let x = idx as f32 * advance;
            if let Some(rect) = tiny_skia::Rect::from_xywh(x + 1.0, 1.0, advance - 2.0, height - 2.0)
            {
                builder.push_rect(rect);
            }
        }
        builder.finish()
    }
}

use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::cleaning::{Clipdrop, clean_background, resolve_clipdrop_key};
use crate::detection::{DetectOptions, detect_regions};
use crate::fonts::{FontCache, resolve_font};
use crate::regions::{DetectionRecord, build_regions, to_records};
use crate::settings::Settings;

pub mod cleaning;
pub mod data;
pub mod detection;
pub mod error;
pub mod fonts;
pub mod geometry;
pub mod logging;
pub mod overlay;
mod paths;
pub mod pipeline;
pub mod providers;
pub mod regions;
pub mod server;
pub mod settings;

#[cfg(test)]
mod test_util;

pub use error::CardError;
pub use geometry::{BoxScale, PixelRect, to_pixel_rect};
pub use overlay::{
    BatchReport, FitOptions, FitOutcome, FittedLayout, GlyphPainter, SkipReason, SkippedRegion,
    TextExtent, TextMeasure, fit, render_regions,
};
pub use pipeline::{PipelineState, Stage};
pub use providers::{Gemini, Provider, ProviderUsage};
pub use regions::{DetectedTextRegion, RgbColor};

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub settings_path: Option<String>,
    /// Font file path or font name, overriding `[font]`.
    pub font: Option<String>,
    pub gemini_key: Option<String>,
    pub clipdrop_key: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Command {
    Detect {
        image: PathBuf,
        out: PathBuf,
        preview: Option<PathBuf>,
    },
    Clean {
        image: PathBuf,
        regions: PathBuf,
        out: PathBuf,
    },
    Render {
        background: PathBuf,
        regions: PathBuf,
        out: PathBuf,
    },
    Run {
        image: PathBuf,
        out: PathBuf,
        regions_out: Option<PathBuf>,
    },
    Serve {
        addr: Option<String>,
    },
}

/// Runs one command and returns what should be printed on stdout.
pub async fn run(config: Config, command: Command) -> Result<String> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let mut settings = settings::load_settings(settings_path)?;
    apply_font_override(&mut settings, config.font.as_deref());

    match command {
        Command::Detect {
            image,
            out,
            preview,
        } => {
            let attachment = data::load_image(&image)?;
            let decoded = attachment.decode()?;
            let built = detect(&config, &settings, &attachment, &decoded).await?;
            write_records(&out, &to_records(&built.regions))?;
            if let Some(preview) = preview {
                let rects: Vec<PixelRect> = built.regions.iter().map(|region| region.rect).collect();
                write_png(&preview, &overlay::annotate(&decoded, &rects))?;
            }
            Ok(format!(
                "{} regions written to {} ({} rejected)",
                built.regions.len(),
                out.display(),
                built.rejected.len()
            ))
        }
        Command::Clean {
            image,
            regions,
            out,
        } => {
            let original = data::load_image(&image)?.decode()?;
            let built = read_regions(&regions, &original)?;
            let rects: Vec<PixelRect> = built.regions.iter().map(|region| region.rect).collect();
            let cleaner = clipdrop(&config, &settings)?;
            let cleaned = clean_background(&cleaner, &original, &rects).await?;
            write_png(&out, &cleaned)?;
            Ok(format!("cleaned background written to {}", out.display()))
        }
        Command::Render {
            background,
            regions,
            out,
        } => {
            let background = data::load_image(&background)?.decode()?;
            let built = read_regions(&regions, &background)?;
            let face = resolve_font(&settings, &mut FontCache::new()).await?;
            let (image, report) =
                render_regions(&background, &built.regions, face.as_ref(), &settings.layout);
            write_png(&out, &image)?;
            Ok(serde_json::to_string_pretty(&report)?)
        }
        Command::Run {
            image,
            out,
            regions_out,
        } => {
            let attachment = data::load_image(&image)?;
            let decoded = attachment.decode()?;
            let state = PipelineState::uploaded(attachment.clone())?;
            let built = detect(&config, &settings, &attachment, &decoded).await?;
            if let Some(path) = regions_out {
                write_records(&path, &to_records(&built.regions))?;
            }
            let rects: Vec<PixelRect> = built.regions.iter().map(|region| region.rect).collect();
            let state = state
                .detected(built.regions.clone())?
                .reviewed(built.regions)?;
            let cleaner = clipdrop(&config, &settings)?;
            let cleaned = clean_background(&cleaner, &decoded, &rects).await?;
            let face = resolve_font(&settings, &mut FontCache::new()).await?;
            let state = state
                .cleaned(cleaned)?
                .composited(face.as_ref(), &settings.layout)?;
            let output = state
                .output()
                .ok_or_else(|| anyhow!("composited card has no output"))?;
            std::fs::write(&out, output)
                .with_context(|| format!("failed to write output: {}", out.display()))?;
            let report = state.report().cloned().unwrap_or_default();
            Ok(serde_json::to_string_pretty(&report)?)
        }
        Command::Serve { addr } => {
            let addr = addr.unwrap_or_else(|| settings.server_addr.clone());
            let state = server::ServerState::new(settings, config.gemini_key, config.clipdrop_key);
            server::run_server(state, addr).await?;
            Ok(String::new())
        }
    }
}

fn apply_font_override(settings: &mut Settings, font: Option<&str>) {
    let Some(font) = font.map(str::trim).filter(|font| !font.is_empty()) else {
        return;
    };
    if Path::new(font).is_file() {
        settings.font_path = Some(font.to_string());
    } else {
        settings.font_name = font.to_string();
        settings.font_path = None;
        settings.font_url = None;
    }
}

async fn detect(
    config: &Config,
    settings: &Settings,
    attachment: &data::ImageAttachment,
    decoded: &image::RgbaImage,
) -> Result<regions::BuiltRegions> {
    let key = providers::resolve_gemini_key(config.gemini_key.as_deref())?;
    let provider = Gemini::new(key).with_model(settings.detection_model.clone());
    let detection = detect_regions(provider, attachment, &DetectOptions::default()).await?;
    if let Some(usage) = detection.usage.as_ref() {
        info!(
            total_tokens = usage.total_tokens.unwrap_or_default(),
            "detection usage"
        );
    }
    let (width, height) = decoded.dimensions();
    Ok(detection.into_regions(settings.box_scale, width, height)?)
}

fn clipdrop(config: &Config, settings: &Settings) -> Result<Clipdrop> {
    let key = resolve_clipdrop_key(config.clipdrop_key.as_deref())?;
    Ok(Clipdrop::new(key, settings.cleaning_endpoint.clone()))
}

fn read_regions(path: &Path, image: &image::RgbaImage) -> Result<regions::BuiltRegions> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read regions: {}", path.display()))?;
    let records: Vec<DetectionRecord> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse regions: {}", path.display()))?;
    Ok(build_regions(
        &records,
        BoxScale::Pixels,
        image.width(),
        image.height(),
    )?)
}

fn write_records(path: &Path, records: &[DetectionRecord]) -> Result<()> {
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(path, json).with_context(|| format!("failed to write regions: {}", path.display()))
}

fn write_png(path: &Path, image: &image::RgbaImage) -> Result<()> {
    let bytes = data::encode_png(image)?;
    std::fs::write(path, bytes).with_context(|| format!("failed to write image: {}", path.display()))
}

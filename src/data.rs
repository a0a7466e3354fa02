use anyhow::{Context, Result, anyhow};
use image::{ImageFormat, RgbaImage};
use std::io::Cursor;
use std::path::Path;

pub const PNG_MIME: &str = "image/png";

/// An uploaded image, kept as the original encoded bytes.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub name: Option<String>,
}

impl ImageAttachment {
    pub fn from_bytes(bytes: Vec<u8>, name: Option<&str>) -> Result<Self> {
        let format =
            image::guess_format(&bytes).with_context(|| "unrecognized image format")?;
        let mime = mime_from_format(format)
            .ok_or_else(|| anyhow!("unsupported image format: {:?}", format))?;
        Ok(Self {
            bytes,
            mime: mime.to_string(),
            name: name.map(|value| value.to_string()),
        })
    }

    pub fn decode(&self) -> Result<RgbaImage> {
        let image = image::load_from_memory(&self.bytes)
            .with_context(|| "failed to decode image")?;
        Ok(image.to_rgba8())
    }
}

pub fn load_image(path: &Path) -> Result<ImageAttachment> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read image: {}", path.display()))?;
    let name = path.file_name().and_then(|value| value.to_str());
    ImageAttachment::from_bytes(bytes, name)
        .with_context(|| format!("failed to load image: {}", path.display()))
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .with_context(|| "failed to encode PNG")?;
    Ok(bytes)
}

pub fn decode_rgba(bytes: &[u8]) -> Result<RgbaImage> {
    let image = image::load_from_memory(bytes).with_context(|| "failed to decode image")?;
    Ok(image.to_rgba8())
}

fn mime_from_format(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Png => Some(PNG_MIME),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::WebP => Some("image/webp"),
        ImageFormat::Gif => Some("image/gif"),
        ImageFormat::Bmp => Some("image/bmp"),
        ImageFormat::Tiff => Some("image/tiff"),
        _ => None,
    }
}

use anyhow::{Result, anyhow};
use image::{Luma, RgbaImage};
use reqwest::multipart::{Form, Part};
use std::future::Future;
use std::io::Cursor;
use std::pin::Pin;
use tracing::info;

use crate::data::{self, PNG_MIME};
use crate::error::CardError;
use crate::geometry::PixelRect;
use crate::providers::get_env;
use crate::providers::retry::{Backoff, retry_after};

pub type CleanerFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;

/// Erases text from an image given a mask of the areas to clean. Returns
/// the encoded cleaned image.
pub trait BackgroundCleaner: Send + Sync {
    fn clean<'a>(&'a self, image_png: Vec<u8>, mask_png: Vec<u8>) -> CleanerFuture<'a>;
}

/// Client for the Clipdrop cleanup endpoint.
#[derive(Debug, Clone)]
pub struct Clipdrop {
    key: String,
    endpoint: String,
    client: reqwest::Client,
}

impl Clipdrop {
    pub fn new(key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn send(&self, image_png: Vec<u8>, mask_png: Vec<u8>) -> Result<Vec<u8>> {
        let mut backoff = Backoff::new("Clipdrop");
        loop {
            let form = Form::new()
                .part(
                    "image_file",
                    Part::bytes(image_png.clone())
                        .file_name("image.png")
                        .mime_str(PNG_MIME)?,
                )
                .part(
                    "mask_file",
                    Part::bytes(mask_png.clone())
                        .file_name("mask.png")
                        .mime_str(PNG_MIME)?,
                );
            let response = self
                .client
                .post(&self.endpoint)
                .header("x-api-key", self.key.clone())
                .multipart(form)
                .send()
                .await?;

            let status = response.status();
            let retry_after = retry_after(response.headers());
            if status.is_success() {
                let bytes = response.bytes().await?;
                return Ok(bytes.to_vec());
            }
            let text = response.text().await.unwrap_or_default();
            if backoff.retry(status, &text, retry_after).await {
                continue;
            }
            return Err(anyhow!(
                "Clipdrop API error ({}): {}",
                status,
                extract_clipdrop_error(&text).unwrap_or(text)
            ));
        }
    }
}

impl BackgroundCleaner for Clipdrop {
    fn clean<'a>(&'a self, image_png: Vec<u8>, mask_png: Vec<u8>) -> CleanerFuture<'a> {
        Box::pin(self.send(image_png, mask_png))
    }
}

pub fn resolve_clipdrop_key(override_key: Option<&str>) -> Result<String> {
    if let Some(key) = override_key.filter(|key| !key.trim().is_empty()) {
        return Ok(key.to_string());
    }
    get_env("CLIPDROP_API_KEY")
        .ok_or_else(|| anyhow!("Clipdrop API key not found (checked CLIPDROP_API_KEY)"))
}

/// Binary mask: white inside every rect, black elsewhere.
pub fn build_mask(width: u32, height: u32, rects: &[PixelRect]) -> image::GrayImage {
    let mut mask = image::GrayImage::from_pixel(width, height, Luma([0]));
    for rect in rects {
        let Some(clip) = rect.clamp_to(width, height) else {
            continue;
        };
        for y in clip.top..clip.bottom {
            for x in clip.left..clip.right {
                mask.put_pixel(x as u32, y as u32, Luma([255]));
            }
        }
    }
    mask
}

/// Sends `original` and a mask of `rects` to the cleaner and decodes the
/// answer, which must keep the original dimensions.
pub async fn clean_background<C: BackgroundCleaner + ?Sized>(
    cleaner: &C,
    original: &RgbaImage,
    rects: &[PixelRect],
) -> Result<RgbaImage> {
    let mask = build_mask(original.width(), original.height(), rects);
    let mut mask_png = Vec::new();
    mask.write_to(&mut Cursor::new(&mut mask_png), image::ImageFormat::Png)?;
    let image_png = data::encode_png(original)?;
    info!(regions = rects.len(), "requesting background cleanup");
    let cleaned = cleaner
        .clean(image_png, mask_png)
        .await
        .map_err(|err| CardError::Cleaning(format!("{:#}", err)))?;
    let cleaned = data::decode_rgba(&cleaned)
        .map_err(|err| CardError::Cleaning(format!("{:#}", err)))?;
    if cleaned.dimensions() != original.dimensions() {
        return Err(CardError::DimensionMismatch {
            expected: original.dimensions(),
            actual: cleaned.dimensions(),
        }
        .into());
    }
    Ok(cleaned)
}

fn extract_clipdrop_error(body: &str) -> Option<String> {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        error: Option<String>,
    }
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    parsed.error.filter(|message| !message.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    struct InvertingCleaner;

    impl BackgroundCleaner for InvertingCleaner {
        fn clean<'a>(&'a self, image_png: Vec<u8>, mask_png: Vec<u8>) -> CleanerFuture<'a> {
            Box::pin(async move {
                let mut image = data::decode_rgba(&image_png)?;
                let mask = image::load_from_memory(&mask_png)?.to_luma8();
                for (x, y, pixel) in image.enumerate_pixels_mut() {
                    if mask.get_pixel(x, y).0[0] == 255 {
                        *pixel = Rgba([255, 255, 255, 255]);
                    }
                }
                data::encode_png(&image)
            })
        }
    }

    #[test]
    fn mask_covers_only_rects() {
        let mask = build_mask(
            10,
            8,
            &[PixelRect::new(1, 1, 4, 3), PixelRect::new(8, 6, 20, 20)],
        );
        assert_eq!(mask.get_pixel(1, 1).0[0], 255);
        assert_eq!(mask.get_pixel(3, 2).0[0], 255);
        assert_eq!(mask.get_pixel(4, 2).0[0], 0);
        assert_eq!(mask.get_pixel(9, 7).0[0], 255);
        assert_eq!(mask.get_pixel(0, 0).0[0], 0);
    }

    #[tokio::test]
    async fn cleaned_image_is_decoded() {
        let original = RgbaImage::from_pixel(6, 6, Rgba([0, 0, 0, 255]));
        let cleaned = clean_background(&InvertingCleaner, &original, &[PixelRect::new(0, 0, 3, 3)])
            .await
            .unwrap();
        assert_eq!(*cleaned.get_pixel(1, 1), Rgba([255, 255, 255, 255]));
        assert_eq!(*cleaned.get_pixel(4, 4), Rgba([0, 0, 0, 255]));
    }

    struct ShrinkingCleaner;

    impl BackgroundCleaner for ShrinkingCleaner {
        fn clean<'a>(&'a self, _image_png: Vec<u8>, _mask_png: Vec<u8>) -> CleanerFuture<'a> {
            Box::pin(async move { data::encode_png(&RgbaImage::new(2, 2)) })
        }
    }

    #[tokio::test]
    async fn resized_answer_is_rejected() {
        let original = RgbaImage::new(6, 4);
        let err = clean_background(&ShrinkingCleaner, &original, &[])
            .await
            .unwrap_err();
        match err.downcast_ref::<CardError>() {
            Some(CardError::DimensionMismatch { expected, actual }) => {
                assert_eq!(*expected, (6, 4));
                assert_eq!(*actual, (2, 2));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn reads_clipdrop_error_body() {
        assert_eq!(
            extract_clipdrop_error(r#"{"error":"Invalid API key"}"#).as_deref(),
            Some("Invalid API key")
        );
        assert_eq!(extract_clipdrop_error("<html>"), None);
    }
}

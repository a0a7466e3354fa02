use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::RgbaImage;
use std::sync::Arc;
use tracing::{info, warn};

use super::models::{
    CleanRequest, CleanResponse, CompositeRequest, CompositeResponse, DetectRequest,
    DetectResponse, ErrorResponse,
};
use super::state::ServerState;
use crate::cleaning::{Clipdrop, clean_background, resolve_clipdrop_key};
use crate::data::{self, ImageAttachment};
use crate::detection::{DetectOptions, Detection, detect_regions};
use crate::error::CardError;
use crate::fonts::resolve_font;
use crate::geometry::{BoxScale, PixelRect};
use crate::overlay::{annotate, render_regions};
use crate::providers::{Gemini, resolve_gemini_key};
use crate::regions::{BuiltRegions, build_regions, to_records};

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn run_server(state: ServerState, addr: String) -> Result<()> {
    let app = router(Arc::new(state));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind server address: {}", addr))?;
    info!("listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/detect", post(detect))
        .route("/clean", post(clean))
        .route("/composite", post(composite))
        .with_state(state)
        .layer(axum::middleware::from_fn(cors_middleware))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    Ok(response)
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type,authorization"),
    );
}

async fn detect(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<DetectRequest>,
) -> Result<Json<DetectResponse>, ApiError> {
    let key = resolve_gemini_key(state.gemini_key.as_deref())
        .map_err(|err| api_error(StatusCode::SERVICE_UNAVAILABLE, format!("{:#}", err)))?;
    let attachment = ImageAttachment::from_bytes(decode_base64(&payload.image_base64)?, None)
        .map_err(bad_request)?;
    let image = attachment.decode().map_err(bad_request)?;
    let (width, height) = image.dimensions();

    let provider = Gemini::new(key).with_model(state.settings.detection_model.clone());
    let Detection {
        records,
        model,
        usage,
    } = detect_regions(provider, &attachment, &DetectOptions::default())
        .await
        .map_err(card_error)?;
    let built = build_regions(&records, state.settings.box_scale, width, height)
        .map_err(card_error)?;
    let rects: Vec<PixelRect> = built.regions.iter().map(|region| region.rect).collect();
    let preview = data::encode_png(&annotate(&image, &rects)).map_err(internal)?;

    Ok(Json(DetectResponse {
        width,
        height,
        regions: to_records(&built.regions),
        rejected: built.rejected,
        preview_base64: BASE64.encode(preview),
        model,
        usage,
    }))
}

async fn clean(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<CleanRequest>,
) -> Result<Json<CleanResponse>, ApiError> {
    let key = resolve_clipdrop_key(state.clipdrop_key.as_deref())
        .map_err(|err| api_error(StatusCode::SERVICE_UNAVAILABLE, format!("{:#}", err)))?;
    let image = decode_image(&payload.image_base64)?;
    let built = pixel_regions(&payload.regions, &image)?;
    let rects: Vec<PixelRect> = built.regions.iter().map(|region| region.rect).collect();

    let cleaner = Clipdrop::new(key, state.settings.cleaning_endpoint.clone());
    let cleaned = clean_background(&cleaner, &image, &rects)
        .await
        .map_err(from_anyhow)?;
    let png = data::encode_png(&cleaned).map_err(internal)?;
    Ok(Json(CleanResponse {
        image_base64: BASE64.encode(png),
    }))
}

async fn composite(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<CompositeRequest>,
) -> Result<Json<CompositeResponse>, ApiError> {
    let background = decode_image(&payload.background_base64)?;
    let built = pixel_regions(&payload.regions, &background)?;

    let mut settings = state.settings.clone();
    if let Some(font) = payload.font.filter(|font| !font.trim().is_empty()) {
        settings.font_name = font;
        settings.font_path = None;
        settings.font_url = None;
    }
    let face = {
        let mut fonts = state.fonts.lock().await;
        resolve_font(&settings, &mut fonts)
            .await
            .map_err(card_error)?
    };

    let options = settings.layout;
    let regions = built.regions;
    let (image, report) = tokio::task::spawn_blocking(move || {
        render_regions(&background, &regions, face.as_ref(), &options)
    })
    .await
    .map_err(|err| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("server task failed: {}", err),
        )
    })?;
    let png = data::encode_png(&image).map_err(internal)?;
    Ok(Json(CompositeResponse {
        image_base64: BASE64.encode(png),
        report,
        rejected: built.rejected,
    }))
}

/// Review-table rows always carry pixel boxes.
fn pixel_regions(
    records: &[crate::regions::DetectionRecord],
    image: &RgbaImage,
) -> Result<BuiltRegions, ApiError> {
    build_regions(records, BoxScale::Pixels, image.width(), image.height()).map_err(card_error)
}

fn decode_base64(value: &str) -> Result<Vec<u8>, ApiError> {
    let trimmed = value.trim();
    let payload = match trimmed.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => trimmed,
    };
    BASE64
        .decode(payload)
        .map_err(|err| api_error(StatusCode::BAD_REQUEST, format!("invalid base64: {}", err)))
}

fn decode_image(value: &str) -> Result<RgbaImage, ApiError> {
    data::decode_rgba(&decode_base64(value)?).map_err(bad_request)
}

fn status_for(err: &CardError) -> StatusCode {
    match err {
        CardError::InvalidImageGeometry { .. }
        | CardError::DegenerateRegion { .. }
        | CardError::InvalidStage { .. } => StatusCode::BAD_REQUEST,
        CardError::FontUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        CardError::DimensionMismatch { .. } | CardError::Detection(_) | CardError::Cleaning(_) => {
            StatusCode::BAD_GATEWAY
        }
    }
}

fn api_error(status: StatusCode, error: String) -> ApiError {
    if status.is_server_error() {
        warn!("request failed ({}): {}", status, error);
    }
    (status, Json(ErrorResponse { error }))
}

fn card_error(err: CardError) -> ApiError {
    api_error(status_for(&err), err.to_string())
}

fn from_anyhow(err: anyhow::Error) -> ApiError {
    match err.downcast_ref::<CardError>() {
        Some(card) => api_error(status_for(card), format!("{:#}", err)),
        None => internal(err),
    }
}

fn bad_request(err: anyhow::Error) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, format!("{:#}", err))
}

fn internal(err: anyhow::Error) -> ApiError {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Stage;
    use crate::regions::DetectionRecord;
    use crate::settings::Settings;
    use image::Rgba;

    fn state() -> Arc<ServerState> {
        Arc::new(ServerState::new(Settings::default(), None, None))
    }

    #[test]
    fn accepts_plain_and_data_url_base64() {
        let encoded = BASE64.encode(b"card");
        assert_eq!(decode_base64(&encoded).unwrap(), b"card");
        let data_url = format!("data:image/png;base64,{}", encoded);
        assert_eq!(decode_base64(&data_url).unwrap(), b"card");

        let (status, Json(body)) = decode_base64("%%%").unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.error.starts_with("invalid base64"));
    }

    #[test]
    fn card_errors_map_to_statuses() {
        let stage = CardError::InvalidStage {
            expected: "cleaned",
            actual: Stage::Detected,
        };
        assert_eq!(status_for(&stage), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&CardError::font_unavailable("Noto", "missing")),
            StatusCode::SERVICE_UNAVAILABLE
        );
        let mismatch = anyhow::Error::from(CardError::DimensionMismatch {
            expected: (4, 4),
            actual: (2, 2),
        });
        assert_eq!(from_anyhow(mismatch).0, StatusCode::BAD_GATEWAY);
        assert_eq!(
            from_anyhow(anyhow::anyhow!("disk full")).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn review_rows_are_read_as_pixels() {
        let image = RgbaImage::from_pixel(100, 50, Rgba([0, 0, 0, 255]));
        let records: Vec<DetectionRecord> = serde_json::from_value(serde_json::json!([
            {"translated_text": "您好", "box_normalized": [10, 5, 60, 30]},
            {"translated_text": "缺少"}
        ]))
        .unwrap();
        let built = pixel_regions(&records, &image).unwrap();
        assert_eq!(built.regions[0].rect, PixelRect::new(10, 5, 60, 30));
        assert_eq!(built.rejected.len(), 1);
        assert_eq!(built.rejected[0].index, 1);
    }

    #[tokio::test]
    async fn composite_rejects_bad_images() {
        let request = CompositeRequest {
            background_base64: BASE64.encode(b"not an image"),
            regions: Vec::new(),
            font: None,
        };
        let (status, _) = composite(State(state()), Json(request))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

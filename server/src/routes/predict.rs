//! Prediction endpoints
//!
//! Both endpoints take a multipart form with `before` and `after` raster
//! files. The request task only collects the upload bytes; decoding and the
//! forward passes run on the blocking pool, the latter while the model mutex
//! is held.

use axum::{
    body::Bytes,
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};

use planet_sentinel::inference::{FullPredictionResponse, ScenePredictionResponse};
use planet_sentinel::raster::{raster_from_image, Raster};
use planet_sentinel::SentinelError;

use crate::state::{SharedModel, SharedState};

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Error returned to the caller; never takes the process down
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn no_model() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "no model loaded")
    }
}

impl From<SentinelError> for ApiError {
    fn from(err: SentinelError) -> Self {
        let status = match &err {
            SentinelError::Configuration(_) | SentinelError::Data(_) | SentinelError::Image(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            SentinelError::ModelLoad(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request failed: {}", self.message);
        } else {
            warn!("Request rejected: {}", self.message);
        }
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

/// POST /predict - scene-level anomaly score
pub async fn predict_scene(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<ScenePredictionResponse>, ApiError> {
    let model = state.model.clone().ok_or_else(ApiError::no_model)?;
    let (before, after) = decode_pair(read_pair(multipart).await?).await?;

    let response = run_blocking(model, move |handle| handle.predict_scene(&before, &after)).await?;
    info!(
        "Scene prediction: {} ({:.4})",
        response.status, response.anomaly_score
    );
    Ok(Json(response))
}

/// POST /predict/full - full-resolution change map stored on disk
pub async fn predict_full(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<FullPredictionResponse>, ApiError> {
    let model = state.model.clone().ok_or_else(ApiError::no_model)?;
    let (before, after) = decode_pair(read_pair(multipart).await?).await?;
    let out_dir = state.config.output_dir.clone();

    let response = run_blocking(model, move |handle| handle.predict_full(&before, &after, &out_dir)).await?;
    info!("Full prediction written to {:?}", response.result_path);
    Ok(Json(response))
}

async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> planet_sentinel::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("worker task failed: {}", e)))?
        .map_err(ApiError::from)
}

async fn run_blocking<T, F>(model: SharedModel, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&planet_sentinel::ModelHandle<planet_sentinel::backend::DefaultBackend>) -> planet_sentinel::Result<T>
        + Send
        + 'static,
{
    blocking(move || {
        let handle = model.blocking_lock();
        f(&handle)
    })
    .await
}

async fn read_pair(mut multipart: Multipart) -> Result<(Bytes, Bytes), ApiError> {
    let mut before = None;
    let mut after = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;
        match name.as_str() {
            "before" => before = Some(bytes),
            "after" => after = Some(bytes),
            other => warn!("Ignoring unexpected form field {:?}", other),
        }
    }

    match (before, after) {
        (Some(before), Some(after)) => Ok((before, after)),
        _ => Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "form must contain `before` and `after` files",
        )),
    }
}

async fn decode_pair((before, after): (Bytes, Bytes)) -> Result<(Raster, Raster), ApiError> {
    blocking(move || Ok((decode_raster(&before)?, decode_raster(&after)?))).await
}

fn decode_raster(bytes: &[u8]) -> planet_sentinel::Result<Raster> {
    let img = image::load_from_memory(bytes).map_err(SentinelError::from)?;
    raster_from_image(img)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use axum::Router;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use planet_sentinel::backend::{default_device, DefaultBackend};
    use planet_sentinel::{ModelHandle, PipelineConfig, SiameseChangeNetConfig};

    use crate::routes::router;
    use crate::state::{AppState, ServerConfig};

    const BOUNDARY: &str = "sentinel-form-boundary";

    fn png(img: image::DynamicImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn rgb(value: u8) -> Vec<u8> {
        png(image::RgbImage::from_pixel(20, 12, image::Rgb([value; 3])).into())
    }

    fn rgba(value: u8) -> Vec<u8> {
        png(image::RgbaImage::from_pixel(20, 12, image::Rgba([value; 4])).into())
    }

    fn form(uri: &str, before: Vec<u8>, after: Vec<u8>) -> Request<Body> {
        let mut body = Vec::new();
        for (name, bytes) in [("before", before), ("after", after)] {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{name}.png\"\r\nContent-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(&bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn app(output_dir: std::path::PathBuf) -> Router {
        let mut pipeline = PipelineConfig::default();
        pipeline.model = SiameseChangeNetConfig::new()
            .with_base_filters(2)
            .with_encoder_depth(1)
            .with_tile_size(8);
        pipeline.inference.tile_size = 8;
        pipeline.inference.stride = 8;

        let device = default_device();
        let model = pipeline.model.init::<DefaultBackend>(&device).unwrap();
        let handle = ModelHandle::from_model(model, &pipeline, device).unwrap();
        let config = ServerConfig {
            output_dir,
            ..Default::default()
        };
        router(Arc::new(AppState::new(config, Some(handle))), 16 * 1024 * 1024)
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (SentinelError::Data("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (SentinelError::Configuration("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (SentinelError::ModelLoad("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (SentinelError::Inference("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn test_decode_png() {
        let raster = decode_raster(&rgb(10)).unwrap();
        assert_eq!(raster.bands(), 3);
        assert_eq!(raster.dims(), (12, 20));
    }

    #[test]
    fn test_garbage_is_unprocessable() {
        let err = ApiError::from(decode_raster(b"not an image").unwrap_err());
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_predict_scene_with_loaded_model() {
        let dir = TempDir::new().unwrap();
        let response = app(dir.path().to_path_buf())
            .oneshot(form("/predict", rgb(10), rgb(200)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        let score = body["anomaly_score"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&score));
        assert!(body["status"] == "Normal" || body["status"] == "Anomaly Detected");
    }

    #[tokio::test]
    async fn test_band_mismatch_is_unprocessable() {
        let dir = TempDir::new().unwrap();
        let app = app(dir.path().to_path_buf());

        // Four-band pair against a three-channel model
        let response = app
            .clone()
            .oneshot(form("/predict", rgba(10), rgba(200)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json(response).await["error"].is_string());

        // Before and after disagree on band count
        let response = app.oneshot(form("/predict", rgb(10), rgba(200))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_server_error_leaves_service_running() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"x").unwrap();
        let app = app(blocker.join("maps"));

        let response = app
            .clone()
            .oneshot(form("/predict/full", rgb(10), rgb(200)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json(response).await["error"].is_string());

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["model_loaded"], true);

        let response = app.oneshot(form("/predict", rgb(10), rgb(200))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_field_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/predict")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(format!("--{BOUNDARY}--\r\n")))
            .unwrap();
        let response = app(dir.path().to_path_buf()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{error::PayloadError, http::header, web, HttpRequest, HttpResponse, Result};
use futures_util::{stream, StreamExt};
use tracing::{debug, error, info};

use crate::error::{VisionError, VisionResult};
use crate::fetch::fetch_image;
use crate::inference::Predictor;
use crate::models::{PredictionResponse, RouteScope, UrlRequest};

/// Multipart field the prediction API expects the image in.
pub const IMAGE_FIELD: &str = "imageData";

pub struct AppState {
    pub predictor: Arc<dyn Predictor>,
    pub http: reqwest::Client,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(predictor: Arc<dyn Predictor>, max_body_bytes: usize) -> Self {
        Self {
            predictor,
            http: reqwest::Client::new(),
            max_body_bytes,
        }
    }
}

/// Health check.
pub async fn index() -> &'static str {
    "CustomVision.ai model host harness"
}

/// Accepts either a raw image body or a multipart form carrying `imageData`.
pub async fn predict_image(
    req: HttpRequest,
    scope: web::Path<RouteScope>,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, VisionError> {
    debug!(project = ?scope.project, published_name = ?scope.published_name, "image route");

    let result = async {
        let image_data = if is_multipart(&req) {
            read_image_field(&req, body).await?
        } else {
            body
        };
        run_prediction(&state, image_data).await
    }
    .await;
    result.map_err(log_failure)
}

/// Body is `{"url": "<http url>"}`.
pub async fn predict_url(
    scope: web::Path<RouteScope>,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, VisionError> {
    debug!(project = ?scope.project, published_name = ?scope.published_name, "url route");

    let result = async {
        let request: UrlRequest =
            serde_json::from_slice(&body).map_err(|e| VisionError::Request(e.to_string()))?;
        info!(url = %request.url, "predicting from url");
        let bytes = fetch_image(&state.http, &request.url, state.max_body_bytes).await?;
        run_prediction(&state, bytes).await
    }
    .await;
    result.map_err(log_failure)
}

fn is_multipart(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |ct| ct.to_ascii_lowercase().starts_with("multipart/form-data"))
}

/// The body was already buffered (and size checked) by the `Bytes` extractor,
/// so the multipart parser reads from memory.
async fn read_image_field(req: &HttpRequest, body: web::Bytes) -> VisionResult<web::Bytes> {
    let body = stream::once(async move { Ok::<_, PayloadError>(body) });
    let mut payload = Multipart::new(req.headers(), body);

    while let Some(item) = payload.next().await {
        let mut field = item?;
        if field.name() != IMAGE_FIELD {
            continue;
        }

        let mut data = web::BytesMut::new();
        while let Some(chunk) = field.next().await {
            data.extend_from_slice(&chunk?);
        }
        return Ok(data.freeze());
    }

    Err(VisionError::Request(format!(
        "multipart body has no `{}` field",
        IMAGE_FIELD
    )))
}

/// Decoding and the graph run are CPU bound, keep them off the async workers.
async fn run_prediction(state: &AppState, bytes: web::Bytes) -> VisionResult<HttpResponse> {
    let predictor = Arc::clone(&state.predictor);
    let predictions = web::block(move || -> VisionResult<_> {
        let image = image::load_from_memory(&bytes)?;
        predictor.predict(&image)
    })
    .await??;

    let response = PredictionResponse::new(predictions);
    info!(id = %response.id, predictions = response.predictions.len(), "prediction done");
    debug!(results = ?response.predictions);
    Ok(HttpResponse::Ok().json(response))
}

fn log_failure(e: VisionError) -> VisionError {
    error!("{}", e.client_message());
    e
}

use crate::error::PredictError;
use crate::metrics::{metrics_router, track_http};
use crate::service::Upload;
use crate::state::AppState;
use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, State,
        multipart::MultipartRejection,
    },
    middleware,
    routing::{get, post},
};
use inference::Detection;
use serde::Serialize;
use tower_http::cors::CorsLayer;

const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub predictions: Vec<Detection>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model: String,
}

pub fn router(state: AppState) -> Router {
    let max_upload_bytes = state.max_upload_bytes;
    let recorder = state.metrics.clone();

    Router::new()
        .route("/predict", post(predict))
        .route("/health", get(health))
        .with_state(state)
        .merge(metrics_router(recorder.clone()))
        .route_layer(middleware::from_fn_with_state(recorder, track_http))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
}

async fn predict(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictResponse>, PredictError> {
    let predictions = state.service.handle(read_upload(multipart)).await?;
    Ok(Json(PredictResponse { predictions }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        model: state.model_name.clone(),
    })
}

/// Pull the `file` part out of the form, skipping any other fields.
async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Upload, PredictError> {
    let mut multipart = multipart.map_err(|e| PredictError::Upload(e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PredictError::Upload(e.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| PredictError::Upload(e.body_text()))?;

        return Ok(Upload { filename, bytes });
    }

    Err(PredictError::MissingFile)
}

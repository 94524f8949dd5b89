use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use inference::DecodeError;
use serde::Serialize;
use thiserror::Error;

/// Request-scoped failures of the prediction pipeline. Every variant is
/// reported to the client as a 500 with a `detail` string.
#[derive(Error, Debug)]
pub enum PredictError {
    #[error("invalid upload: {0}")]
    Upload(String),

    #[error("missing form field `file`")]
    MissingFile,

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("inference failed: {0:#}")]
    Inference(anyhow::Error),

    #[error("inference task aborted: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PredictError {
    /// Pipeline stage the request failed in, for logs.
    pub fn stage(&self) -> &'static str {
        match self {
            PredictError::Upload(_) | PredictError::MissingFile => "upload",
            PredictError::Decode(_) => "decoding",
            PredictError::Inference(_) | PredictError::Task(_) => "inferring",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            detail: self.to_string(),
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

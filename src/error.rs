use actix_web::{error::BlockingError, http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

/// Everything that can go wrong while serving a prediction.
///
/// The HTTP front does not differentiate: every variant becomes a 500 whose
/// body is the JSON-encoded message string.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("bad request: {0}")]
    Request(String),

    #[error("failed to fetch image: {0}")]
    Fetch(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("unexpected model output: {0}")]
    Output(String),

    #[error("failed to load model: {0}")]
    Load(String),

    #[error("worker pool unavailable: {0}")]
    Blocking(#[from] BlockingError),
}

impl From<reqwest::Error> for VisionError {
    fn from(e: reqwest::Error) -> Self {
        VisionError::Fetch(e.to_string())
    }
}

impl From<actix_multipart::MultipartError> for VisionError {
    fn from(e: actix_multipart::MultipartError) -> Self {
        VisionError::Request(e.to_string())
    }
}

impl VisionError {
    /// Message sent to clients, in the shape the cloud harness used.
    pub fn client_message(&self) -> String {
        format!("[ERROR] Exception in score : {}", self)
    }
}

impl ResponseError for VisionError {
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(self.client_message())
    }
}

pub type VisionResult<T> = Result<T, VisionError>;

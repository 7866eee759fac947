//! Error types for the pdfdesk server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pdfdesk_core::PdfDeskError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No file uploaded")]
    MissingFile,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Processing(#[from] PdfDeskError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::MissingFile | ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Processing(e) => {
                tracing::error!("Translation failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

//! API handlers for the pdfdesk server

use axum::{
    extract::{Multipart, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        HeaderValue,
    },
    response::{IntoResponse, Response},
    Json,
};
use pdfdesk_core::{translate_pdf, CancellationToken, DEFAULT_TARGET_LANGUAGE};
use serde::Serialize;
use tracing::info;

use crate::error::ApiError;
use crate::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Handler: GET /health
pub async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "pdfdesk-server",
        version: env!("CARGO_PKG_VERSION"),
    })
}

struct Upload {
    name: String,
    data: Vec<u8>,
}

/// Handler: POST /api/translate
///
/// Multipart fields: `file` (required) and `targetLang` (defaults to Hindi).
/// Responds with the translated PDF as an attachment.
pub async fn handle_translate(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut upload = None;
    let mut target_lang = DEFAULT_TARGET_LANGUAGE.to_string();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("Failed to read multipart field: {}", e)))?
    {
        match field.name().map(str::to_owned).as_deref() {
            Some("file") => {
                let name = field.file_name().unwrap_or("document.pdf").to_string();
                let data = field.bytes().await.map_err(|e| {
                    ApiError::InvalidRequest(format!("Failed to read file data: {}", e))
                })?;
                upload = Some(Upload {
                    name,
                    data: data.to_vec(),
                });
            }
            Some("targetLang") => {
                let text = field.text().await.map_err(|e| {
                    ApiError::InvalidRequest(format!("Failed to read targetLang: {}", e))
                })?;
                if !text.trim().is_empty() {
                    target_lang = text.trim().to_string();
                }
            }
            _ => {}
        }
    }

    let upload = upload
        .filter(|u| !u.data.is_empty())
        .ok_or(ApiError::MissingFile)?;
    info!(
        "Translating {} ({} bytes) to {}",
        upload.name,
        upload.data.len(),
        target_lang
    );

    let output = translate_pdf(
        &upload.data,
        state.translator.as_ref(),
        &target_lang,
        state.font.as_deref(),
        &CancellationToken::new(),
    )
    .await?;

    let disposition =
        HeaderValue::from_str(&format!("attachment; filename=\"translated_{}\"", upload.name))
            .unwrap_or_else(|_| {
                HeaderValue::from_static("attachment; filename=\"translated_document.pdf\"")
            });

    Ok((
        [
            (CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
            (CONTENT_DISPOSITION, disposition),
        ],
        output,
    )
        .into_response())
}

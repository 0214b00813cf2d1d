//! Taxonomía de errores del servicio y su traducción a respuestas HTTP.
//!
//! Los mensajes se mantienen en inglés porque el frontend los muestra tal cual
//! (p. ej. `{"error": "File not found"}`).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errores de extracción de texto (DOCX, PDF o texto plano).
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("error reading .docx file: {0}")]
    Docx(String),

    #[error("error reading .pdf file: {0}")]
    Pdf(String),

    #[error("error reading file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("File not found")]
    NotFound,

    #[error("path escapes the upload directory: {0}")]
    PathSecurity(String),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("semantic index is not initialized")]
    IndexUninitialized,

    #[error("provider error: {0}")]
    Provider(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Configuration(_) | AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::PathSecurity(_) => StatusCode::FORBIDDEN,
            AppError::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::IndexUninitialized => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Provider(_) => StatusCode::BAD_GATEWAY,
            AppError::Io(_) | AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Error atendiendo la petición");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

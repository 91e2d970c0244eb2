//! API error types

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::pipeline::OverseerError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing form fields, unknown catalog or duplicate job
    #[error("{0}")]
    BadRequest(String),

    /// Not accepting jobs any more
    #[error("{0}")]
    Unavailable(String),
}

impl ApiError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unavailable(_) => "UNAVAILABLE",
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
}

impl From<OverseerError> for ApiError {
    fn from(e: OverseerError) -> Self {
        match e {
            OverseerError::UnknownCatalog(_) | OverseerError::DuplicateJob(_) => {
                Self::BadRequest(e.to_string())
            }
            OverseerError::ShuttingDown | OverseerError::QueueClosed => Self::Unavailable(e.to_string()),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self::BadRequest(e.body_text())
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
        };

        tracing::warn!(
            error_code = body.error,
            error_message = %body.message,
            status = %status,
            "Request rejected"
        );

        (status, Json(body)).into_response()
    }
}

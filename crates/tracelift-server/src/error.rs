//! Application error types and Axum response conversion.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use tracelift_core::ValidationError;

/// Application-level errors with HTTP status code mapping.
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    NotFound(String),
    /// The job exists but has not finished yet.
    NotReady(String),
    JobFailed(String),
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::NotReady(_) => StatusCode::ACCEPTED,
            AppError::JobFailed(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        AppError::Validation(e.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match self {
            AppError::Validation(m)
            | AppError::NotFound(m)
            | AppError::NotReady(m)
            | AppError::JobFailed(m)
            | AppError::Internal(m) => m,
        };
        (status, Json(ErrorResponse { detail })).into_response()
    }
}

//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use todo_core::{BatchError, ListError, StoreError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    List(#[from] ListError),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Profile not found")]
    ProfileNotFound,

    #[error("{0}")]
    BadRequest(String),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::List(ListError::Store(e))
    }
}

impl From<BatchError> for AppError {
    fn from(e: BatchError) -> Self {
        AppError::List(ListError::Validation(e))
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::List(ListError::NotFound) | AppError::ProfileNotFound => StatusCode::NOT_FOUND,
            AppError::List(ListError::Unauthorized) | AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::List(ListError::Validation(_)) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::List(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            AppError::List(ListError::Store(StoreError::Closed)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::List(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
            // Store internals stay in the log
            return (status, status.canonical_reason().unwrap_or("Error")).into_response();
        }
        tracing::debug!("Request rejected with {}: {}", status, self);
        (status, self.to_string()).into_response()
    }
}

//! HTTP error mapping
//!
//! Authorization failures never reach this type: the authorizer layer answers
//! them with its own uniform 401 before any handler runs.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::store::StoreError;

/// Result type for handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Handler failures
#[derive(Debug, Error)]
pub enum ApiError {
    /// No record under this key
    #[error("customer `{0}` not found")]
    NotFound(String),

    /// The request body or parameters are unusable
    #[error("{0}")]
    BadRequest(String),

    /// The store refused or failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) | Self::Store(StoreError::InvalidKey(_)) => StatusCode::BAD_REQUEST,
            Self::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) | Self::Store(StoreError::InvalidKey(_)) => "bad_request",
            Self::Store(StoreError::Unavailable(_)) => "unavailable",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "Request failed");
        }
        let body = json!({
            "error": self.code(),
            "error_description": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

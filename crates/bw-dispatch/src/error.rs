use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;
use utoipa::ToSchema;

use bw_common::TransportError;
use bw_store::StoreError;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("a send job is already running")]
    Conflict,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl DispatchError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::JobAlreadyActive => DispatchError::Conflict,
            other => DispatchError::Store(other),
        }
    }
}

/// Error response body
#[derive(Debug, serde::Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            DispatchError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            DispatchError::Conflict => (StatusCode::CONFLICT, "CONFLICT"),
            DispatchError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            DispatchError::Transport(_) => (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR"),
            DispatchError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

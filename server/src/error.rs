//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use notably_engine::Error as EngineError;
use serde::Serialize;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("{0}")]
    BadRequest(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Engine(err) => match &err {
                EngineError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, err.to_string()),
                EngineError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
                EngineError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, err.to_string()),
                EngineError::Conflict(_) => (StatusCode::CONFLICT, err.to_string()),
                EngineError::Backend { .. } => {
                    tracing::error!("Backend error: {err:?}");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "backend error".to_string(),
                    )
                }
            },
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;

//! Mapping from engine errors to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;
use tracing::error;
use traffic_common::TrafficError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Request body or query could not be used as given
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Traffic(#[from] TrafficError),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::Traffic(TrafficError::Persistence(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Traffic(TrafficError::Validation(message)) => {
                (StatusCode::BAD_REQUEST, message)
            }
            ApiError::Traffic(e @ TrafficError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, e.to_string())
            }
            ApiError::Traffic(TrafficError::Persistence(e)) => {
                error!(error = %e, "Request failed on the store");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

//! Typed errors for engine operations.

use thiserror::Error;

/// Errors surfaced by request-path operations.
#[derive(Debug, Error)]
pub enum TrafficError {
    /// Missing or malformed input
    #[error("{0}")]
    Validation(String),

    /// Referenced junction or road does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Store unreachable or a write failed
    #[error("persistence error: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl TrafficError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn junction_not_found(id: i64) -> Self {
        Self::NotFound { entity: "junction", id }
    }

    pub fn road_not_found(id: i64) -> Self {
        Self::NotFound { entity: "road", id }
    }
}

/// Result type alias for engine operations.
pub type TrafficResult<T> = std::result::Result<T, TrafficError>;

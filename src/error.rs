//! Error types for the settings engine
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Sync Error Enum ==
/// Unified error type for the settings engine.
///
/// None of these are fatal to the engine: each one has a degraded fallback
/// and reads keep being served from the cache.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A value was rejected and replaced by its default
    #[error("Invalid value for '{key}': {reason}")]
    Validation { key: String, reason: String },

    /// Durable store read/write failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Transport-level remote failure (connection, timeout, non-2xx)
    #[error("Network error: {0}")]
    Network(String),

    /// Remote answered with `success = false`
    #[error("Remote rejected request: {0}")]
    Remote(String),

    /// Cross-context broadcast failure
    #[error("Sync transport error: {0}")]
    Sync(String),

    /// A batch failed every allowed attempt
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: String },

    /// Import payload could not be understood
    #[error("Invalid import: {0}")]
    InvalidImport(String),

    /// Key has neither a value nor a registered default
    #[error("Setting not found: {0}")]
    NotFound(String),

    /// Operation requires an initialized, live engine
    #[error("Engine not ready: {0}")]
    NotReady(String),

    /// JSON encoding/decoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Returns true for failures the retry manager should retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::Remote(_))
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = match &self {
            SyncError::Validation { .. } | SyncError::InvalidImport(_) => StatusCode::BAD_REQUEST,
            SyncError::Serialization(_) => StatusCode::BAD_REQUEST,
            SyncError::Network(_) | SyncError::Remote(_) => StatusCode::BAD_GATEWAY,
            SyncError::ExhaustedRetries { .. } => StatusCode::BAD_GATEWAY,
            SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            SyncError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            SyncError::Persistence(_) | SyncError::Sync(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the settings engine.
pub type Result<T> = std::result::Result<T, SyncError>;

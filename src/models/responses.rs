//! Response DTOs for the settings API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;
use serde_json::Value;

use crate::models::SettingsMap;

/// Response body for `GET /settings/:key`
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    pub key: String,
    pub value: Value,
}

impl GetResponse {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Response body for `PUT /settings/:key`
///
/// `value` is what was stored after sanitization.
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    pub message: String,
    pub key: String,
    pub value: Value,
}

impl SetResponse {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        Self {
            message: format!("Setting '{}' saved", key),
            key,
            value,
        }
    }
}

/// Response body for `DELETE /settings/:key`
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    pub message: String,
    pub key: String,
    /// Value after deletion: the default, or null for unregistered keys
    pub value: Value,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>, value: Option<Value>) -> Self {
        let key = key.into();
        Self {
            message: format!("Setting '{}' deleted", key),
            key,
            value: value.unwrap_or(Value::Null),
        }
    }
}

/// Response body for every endpoint returning a settings map
#[derive(Debug, Clone, Serialize)]
pub struct SettingsResponse {
    pub count: usize,
    pub settings: SettingsMap,
}

impl SettingsResponse {
    pub fn new(settings: SettingsMap) -> Self {
        Self {
            count: settings.len(),
            settings,
        }
    }
}

/// Response body for the health endpoint (`GET /health`)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

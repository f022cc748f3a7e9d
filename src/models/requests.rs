//! Request DTOs for the settings API
//!
//! Defines the structure of incoming HTTP request bodies and query strings.

use serde::Deserialize;
use serde_json::Value;

use crate::cache::MAX_KEY_LENGTH;
use crate::models::{SaveOptions, SettingsMap};

/// Checks a setting key.
///
/// Returns an error message if validation fails, None if valid.
pub fn validate_key(key: &str) -> Option<String> {
    if key.trim().is_empty() {
        return Some("Key cannot be empty".to_string());
    }
    if key.len() > MAX_KEY_LENGTH {
        return Some(format!(
            "Key exceeds maximum length of {} characters",
            MAX_KEY_LENGTH
        ));
    }
    None
}

/// Request body for `PUT /settings/:key`
#[derive(Debug, Clone, Deserialize)]
pub struct SetValueRequest {
    pub value: Value,
    #[serde(default)]
    pub options: SaveOptions,
}

/// Request body for `PATCH /settings`
#[derive(Debug, Clone, Deserialize)]
pub struct SetMultipleRequest {
    pub settings: SettingsMap,
    #[serde(default)]
    pub options: SaveOptions,
}

impl SetMultipleRequest {
    /// Returns the first invalid key's error message, if any.
    pub fn validate(&self) -> Option<String> {
        self.settings.keys().find_map(|key| validate_key(key))
    }
}

/// Request body for `POST /settings/reset`; no keys means every registered key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResetRequest {
    #[serde(default)]
    pub keys: Option<Vec<String>>,
}

/// Query string for `GET /search`
#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

/// Query string for `GET /export`
#[derive(Debug, Clone, Deserialize)]
pub struct ExportQuery {
    #[serde(default = "default_export_format")]
    pub format: String,
}

fn default_export_format() -> String {
    "json".to_string()
}

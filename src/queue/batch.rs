//! Queue Batch Module
//!
//! A set of pending key/value writes travelling to the remote as one unit.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::current_timestamp_ms;
use crate::models::{SaveOptions, SettingsMap};

// == Queue Batch ==
/// Pending remote write. Succeeds or fails as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueBatch {
    pub id: String,
    pub settings: SettingsMap,
    pub options: SaveOptions,
    /// Unix milliseconds
    pub created_at: u64,
    /// Attempts made so far
    pub attempts: u32,
    /// Unix milliseconds of the next scheduled attempt, if backing off
    #[serde(default)]
    pub next_retry_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueueBatch {
    pub fn new(settings: SettingsMap, options: SaveOptions) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            settings,
            options,
            created_at: current_timestamp_ms(),
            attempts: 0,
            next_retry_at: None,
            last_error: None,
        }
    }

    /// Merges a later delta into this batch; later values win per key.
    pub fn merge(&mut self, delta: &SettingsMap, options: &SaveOptions) {
        for (key, value) in delta {
            self.settings.insert(key.clone(), value.clone());
        }
        self.options.merge(options);
    }

    pub fn keys(&self) -> Vec<String> {
        self.settings.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }
}

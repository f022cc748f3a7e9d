//! Wire formats shared by persistence, the broadcast bus and the remote.
//!
//! All JSON field names are camelCase.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SettingsMap;

/// Kind tag carried by every cross-context message.
pub const SETTINGS_UPDATE_KIND: &str = "settings-update";

// == Save Options ==
/// Where a mutation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeSource {
    #[default]
    Local,
    CrossTab,
    Remote,
    Import,
    Reset,
}

/// Per-mutation options, forwarded to the remote with the batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SaveOptions {
    /// Flush right away instead of waiting for the debounce window
    pub immediate: bool,
    /// Skip the `ui-updated` event
    pub silent: bool,
    pub source: ChangeSource,
}

impl SaveOptions {
    pub fn immediate() -> Self {
        Self {
            immediate: true,
            ..Self::default()
        }
    }

    pub fn with_source(source: ChangeSource) -> Self {
        Self {
            source,
            ..Self::default()
        }
    }

    /// Merges options of a later mutation into a pending batch.
    pub fn merge(&mut self, later: &SaveOptions) {
        self.immediate |= later.immediate;
        self.silent &= later.silent;
        self.source = later.source;
    }
}

// == Snapshot ==
/// Full settings map persisted to the durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub settings: SettingsMap,
    /// Unix milliseconds
    pub timestamp: u64,
    pub schema_version: u32,
    pub origin_id: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub backup: bool,
}

// == Sync Message ==
/// Cross-context change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    pub kind: String,
    pub delta: SettingsMap,
    /// Unix milliseconds at the sender
    pub timestamp: u64,
    pub origin_id: String,
}

impl SyncMessage {
    pub fn settings_update(delta: SettingsMap, timestamp: u64, origin_id: impl Into<String>) -> Self {
        Self {
            kind: SETTINGS_UPDATE_KIND.to_string(),
            delta,
            timestamp,
            origin_id: origin_id.into(),
        }
    }

    pub fn is_settings_update(&self) -> bool {
        self.kind == SETTINGS_UPDATE_KIND
    }
}

// == Remote Exchange ==
/// Body of a remote write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRequest {
    pub settings: SettingsMap,
    pub options: SaveOptions,
    pub timestamp: u64,
    pub origin_id: String,
    pub schema_version: u32,
}

/// Envelope returned by every remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResponseEnvelope {
    pub fn ok(data: Option<Value>) -> Self {
        Self {
            success: true,
            data,
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }
}

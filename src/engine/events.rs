//! Engine events and status types.

use serde::Serialize;

use crate::metrics::MetricsSnapshot;
use crate::models::{ChangeSource, SettingsMap};

/// Capacity of the engine's event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// == Engine Event ==
/// Notification delivered to every `subscribe()` receiver.
///
/// Serialized as `{"event": "<kebab-case-name>", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum EngineEvent {
    #[serde(rename_all = "camelCase")]
    Initialized { origin_id: String, settings: usize },

    /// A batch was acknowledged by the remote.
    #[serde(rename_all = "camelCase")]
    SettingsSaved {
        batch_id: String,
        keys: Vec<String>,
        attempts: u32,
        latency_ms: u64,
    },

    /// Values visible to readers changed.
    #[serde(rename_all = "camelCase")]
    UiUpdated {
        changes: SettingsMap,
        source: ChangeSource,
    },

    /// A sibling context's change was applied here.
    #[serde(rename_all = "camelCase")]
    CrossTabSync {
        changes: SettingsMap,
        origin_id: String,
    },

    #[serde(rename_all = "camelCase")]
    MetricsCollected { metrics: MetricsSnapshot },

    /// A batch exhausted its retries and moved to the offline queue.
    #[serde(rename_all = "camelCase")]
    RetryFailed {
        batch_id: String,
        keys: Vec<String>,
        attempts: u32,
        error: String,
    },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::Initialized { .. } => "initialized",
            EngineEvent::SettingsSaved { .. } => "settings-saved",
            EngineEvent::UiUpdated { .. } => "ui-updated",
            EngineEvent::CrossTabSync { .. } => "cross-tab-sync",
            EngineEvent::MetricsCollected { .. } => "metrics-collected",
            EngineEvent::RetryFailed { .. } => "retry-failed",
        }
    }
}

// == Engine State ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Uninitialized,
    Loading,
    Ready,
    /// A batch is in flight
    Saving,
    Destroyed,
}

// == Engine Status ==
/// Point-in-time view returned by `get_status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub state: EngineState,
    pub online: bool,
    pub origin_id: String,
    pub transport: &'static str,
    /// Keys waiting in the debounce window
    pub pending_changes: usize,
    /// Batches in the offline queue plus any batch backing off
    pub retry_queue_size: usize,
    pub cache_entries: usize,
    /// Unix milliseconds of the last acknowledged write
    pub last_saved_at: Option<u64>,
    pub last_error: Option<String>,
}

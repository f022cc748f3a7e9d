//! Data models for the settings engine
//!
//! Wire formats shared with sibling contexts and the remote store, plus the
//! DTOs used by the HTTP API.

pub mod requests;
pub mod responses;
pub mod wire;

use serde_json::{Map, Value};

/// Key → value map used for deltas, snapshots and remote payloads.
pub type SettingsMap = Map<String, Value>;

// Re-export commonly used types
pub use requests::{
    validate_key, ExportQuery, ResetRequest, SearchQuery, SetMultipleRequest, SetValueRequest,
};
pub use responses::{
    DeleteResponse, GetResponse, HealthResponse, SetResponse, SettingsResponse,
};
pub use wire::{
    ChangeSource, ResponseEnvelope, SaveOptions, SaveRequest, Snapshot, SyncMessage,
    SETTINGS_UPDATE_KIND,
};

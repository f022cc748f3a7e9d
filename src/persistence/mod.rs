//! Persistence Module
//!
//! Writes full settings snapshots (plus a backup copy) and the offline
//! queue to a durable store shared by every context of the origin.

mod backend;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::current_timestamp_ms;
use crate::error::{Result, SyncError};
use crate::models::{SettingsMap, Snapshot};
use crate::queue::QueueBatch;

pub use backend::{FileStorage, MemoryStorage, StorageBackend, StorageEvent};

// == Storage Keys ==
pub const SNAPSHOT_KEY: &str = "settings_sync.snapshot";
pub const BACKUP_KEY: &str = "settings_sync.backup";
pub const OFFLINE_QUEUE_KEY: &str = "settings_sync.offline_queue";

// == Persistence Layer ==
/// Snapshot and offline-queue persistence for one engine.
#[derive(Debug, Clone)]
pub struct PersistenceLayer {
    backend: Arc<dyn StorageBackend>,
    origin_id: String,
    schema_version: u32,
    /// Snapshots older than this are ignored
    max_age_ms: u64,
}

impl PersistenceLayer {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        origin_id: impl Into<String>,
        schema_version: u32,
        max_age_ms: u64,
    ) -> Self {
        Self {
            backend,
            origin_id: origin_id.into(),
            schema_version,
            max_age_ms,
        }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    // == Write Snapshot ==
    /// Writes the full map to the primary and backup keys.
    ///
    /// Both writes are attempted; the first error is returned. Returns the
    /// snapshot timestamp on success.
    pub fn write_snapshot(&self, settings: &SettingsMap) -> Result<u64> {
        let timestamp = current_timestamp_ms();
        let mut snapshot = Snapshot {
            settings: settings.clone(),
            timestamp,
            schema_version: self.schema_version,
            origin_id: self.origin_id.clone(),
            backup: false,
        };

        let primary = serde_json::to_string(&snapshot)
            .map_err(SyncError::from)
            .and_then(|json| self.backend.set_item(SNAPSHOT_KEY, &json));

        snapshot.backup = true;
        let backup = serde_json::to_string(&snapshot)
            .map_err(SyncError::from)
            .and_then(|json| self.backend.set_item(BACKUP_KEY, &json));

        primary.and(backup).map(|_| {
            debug!("Snapshot written with {} settings", settings.len());
            timestamp
        })
    }

    // == Read Snapshot ==
    /// Returns the freshest usable snapshot's settings.
    ///
    /// The primary is preferred; the backup is used when the primary is
    /// missing, corrupt, stale or from another schema version.
    pub fn read_snapshot(&self) -> Option<SettingsMap> {
        self.read_snapshot_record().map(|snapshot| snapshot.settings)
    }

    pub fn read_snapshot_record(&self) -> Option<Snapshot> {
        let now = current_timestamp_ms();
        [SNAPSHOT_KEY, BACKUP_KEY]
            .iter()
            .filter_map(|key| self.load_snapshot(key))
            .find(|snapshot| self.is_usable(snapshot, now))
    }

    fn load_snapshot(&self, key: &str) -> Option<Snapshot> {
        let raw = match self.backend.get_item(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read {}: {}", key, e);
                return None;
            }
        };
        match serde_json::from_str::<Snapshot>(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Discarding corrupt snapshot at {}: {}", key, e);
                None
            }
        }
    }

    fn is_usable(&self, snapshot: &Snapshot, now: u64) -> bool {
        if snapshot.schema_version != self.schema_version {
            debug!(
                "Ignoring snapshot with schema version {} (expected {})",
                snapshot.schema_version, self.schema_version
            );
            return false;
        }
        let age = now.saturating_sub(snapshot.timestamp);
        if age > self.max_age_ms {
            debug!("Ignoring stale snapshot ({} ms old)", age);
            return false;
        }
        true
    }

    // == Offline Queue ==
    pub fn write_offline_queue(&self, batches: &[QueueBatch]) -> Result<()> {
        if batches.is_empty() {
            return self.backend.remove_item(OFFLINE_QUEUE_KEY);
        }
        let json = serde_json::to_string(batches)?;
        self.backend.set_item(OFFLINE_QUEUE_KEY, &json)
    }

    /// Reads the persisted offline queue; corrupt data yields an empty queue.
    pub fn read_offline_queue(&self) -> Vec<QueueBatch> {
        match self.backend.get_item(OFFLINE_QUEUE_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Discarding corrupt offline queue: {}", e);
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Failed to read offline queue: {}", e);
                Vec::new()
            }
        }
    }

    /// Removes both snapshots.
    pub fn clear_snapshots(&self) -> Result<()> {
        self.backend.remove_item(SNAPSHOT_KEY)?;
        self.backend.remove_item(BACKUP_KEY)
    }
}

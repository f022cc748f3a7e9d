//! Broadcast transports between sibling contexts.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::models::SyncMessage;
use crate::persistence::{StorageBackend, StorageEvent};

/// Shared-store key used by the fallback transport.
pub const BROADCAST_KEY: &str = "settings_sync.broadcast";

const CHANNEL_CAPACITY: usize = 256;

// == Transport Trait ==
/// A publish/subscribe medium shared by every context of an origin.
pub trait BroadcastTransport: Send + Sync + Debug {
    fn publish(&self, message: &SyncMessage) -> Result<()>;
    fn subscribe(&self) -> TransportReceiver;
    fn name(&self) -> &'static str;
}

// == Transport Receiver ==
/// Receiving half of either transport.
pub enum TransportReceiver {
    Channel(broadcast::Receiver<SyncMessage>),
    Storage(broadcast::Receiver<StorageEvent>),
}

impl TransportReceiver {
    /// Waits for the next message. Returns None once the transport closes.
    pub async fn recv(&mut self) -> Option<SyncMessage> {
        match self {
            TransportReceiver::Channel(rx) => loop {
                match rx.recv().await {
                    Ok(message) => return Some(message),
                    Err(RecvError::Lagged(n)) => {
                        warn!("Sync receiver lagged, skipped {} messages", n);
                    }
                    Err(RecvError::Closed) => return None,
                }
            },
            TransportReceiver::Storage(rx) => loop {
                match rx.recv().await {
                    Ok(StorageEvent {
                        key,
                        new_value: Some(raw),
                    }) if key == BROADCAST_KEY => match serde_json::from_str(&raw) {
                        Ok(message) => return Some(message),
                        Err(e) => warn!("Dropping malformed broadcast entry: {}", e),
                    },
                    // Other keys and the cleanup removals.
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        warn!("Storage event receiver lagged, skipped {} events", n);
                    }
                    Err(RecvError::Closed) => return None,
                }
            },
        }
    }
}

// == Channel Transport ==
/// Native publish/subscribe. Clones share one channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    sender: broadcast::Sender<SyncMessage>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastTransport for ChannelTransport {
    fn publish(&self, message: &SyncMessage) -> Result<()> {
        // No listeners means no siblings; nothing to deliver.
        let _ = self.sender.send(message.clone());
        Ok(())
    }

    fn subscribe(&self) -> TransportReceiver {
        TransportReceiver::Channel(self.sender.subscribe())
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

// == Storage Transport ==
/// Fallback that writes a short-lived entry to the shared store and lets
/// the store's change notifications wake siblings.
///
/// Two contexts publishing inside the same window race on one key; delivery
/// and ordering are not guaranteed.
#[derive(Debug, Clone)]
pub struct StorageTransport {
    storage: Arc<dyn StorageBackend>,
    ttl: Duration,
}

impl StorageTransport {
    pub fn new(storage: Arc<dyn StorageBackend>, ttl: Duration) -> Self {
        Self { storage, ttl }
    }
}

impl BroadcastTransport for StorageTransport {
    fn publish(&self, message: &SyncMessage) -> Result<()> {
        let raw = serde_json::to_string(message)?;
        self.storage
            .set_item(BROADCAST_KEY, &raw)
            .map_err(|e| SyncError::Sync(e.to_string()))?;

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime for broadcast cleanup, entry left for the next publish");
            return Ok(());
        };
        let storage = self.storage.clone();
        let ttl = self.ttl;
        handle.spawn(async move {
            tokio::time::sleep(ttl).await;
            // Leave a sibling's newer entry alone.
            if let Ok(Some(current)) = storage.get_item(BROADCAST_KEY) {
                if current == raw {
                    if let Err(e) = storage.remove_item(BROADCAST_KEY) {
                        debug!("Broadcast cleanup failed: {}", e);
                    }
                }
            }
        });
        Ok(())
    }

    fn subscribe(&self) -> TransportReceiver {
        TransportReceiver::Storage(self.storage.subscribe())
    }

    fn name(&self) -> &'static str {
        "storage"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SettingsMap;
    use crate::persistence::MemoryStorage;

    fn message(origin: &str) -> SyncMessage {
        SyncMessage::settings_update(SettingsMap::new(), 1, origin)
    }

    #[tokio::test]
    async fn test_channel_transport_delivers_to_clones() {
        let a = ChannelTransport::new();
        let b = a.clone();
        let mut rx = b.subscribe();

        a.publish(&message("ctx-a")).unwrap();

        assert_eq!(rx.recv().await.unwrap().origin_id, "ctx-a");
    }

    #[tokio::test]
    async fn test_storage_transport_roundtrip_and_cleanup() {
        let storage = MemoryStorage::new();
        let transport = StorageTransport::new(Arc::new(storage.clone()), Duration::from_millis(30));
        let mut rx = transport.subscribe();

        transport.publish(&message("ctx-a")).unwrap();
        assert_eq!(rx.recv().await.unwrap().origin_id, "ctx-a");
        assert!(storage.get_item(BROADCAST_KEY).unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(storage.get_item(BROADCAST_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_storage_transport_skips_unrelated_keys() {
        let storage = MemoryStorage::new();
        let transport = StorageTransport::new(Arc::new(storage.clone()), Duration::from_secs(1));
        let mut rx = transport.subscribe();

        storage.set_item("settings_sync.snapshot", "{}").unwrap();
        storage.set_item(BROADCAST_KEY, "garbage").unwrap();
        transport.publish(&message("ctx-b")).unwrap();

        assert_eq!(rx.recv().await.unwrap().origin_id, "ctx-b");
    }

    #[tokio::test]
    async fn test_storage_transport_failure_is_sync_error() {
        let storage = MemoryStorage::new();
        storage.set_quota(Some(0));
        let transport = StorageTransport::new(Arc::new(storage), Duration::from_secs(1));

        let result = transport.publish(&message("ctx-a"));
        assert!(matches!(result, Err(SyncError::Sync(_))));
    }
}

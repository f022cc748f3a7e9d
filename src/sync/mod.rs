//! Sync Bus Module
//!
//! Broadcasts committed changes to sibling contexts and filters what comes
//! back. Every message carries the sender's origin id; a context drops its
//! own messages so changes are never echoed.

mod transport;

use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::Result;
use crate::metrics::Metrics;
use crate::models::{SettingsMap, SyncMessage};

pub use transport::{
    BroadcastTransport, ChannelTransport, StorageTransport, TransportReceiver, BROADCAST_KEY,
};

// == Sync Bus ==
#[derive(Debug, Clone)]
pub struct SyncBus {
    transport: Arc<dyn BroadcastTransport>,
    origin_id: String,
    metrics: Arc<Metrics>,
}

impl SyncBus {
    pub fn new(
        transport: Arc<dyn BroadcastTransport>,
        origin_id: impl Into<String>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            transport,
            origin_id: origin_id.into(),
            metrics,
        }
    }

    pub fn origin_id(&self) -> &str {
        &self.origin_id
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    // == Broadcast ==
    /// Publishes `delta` stamped with this context's origin and `timestamp`.
    pub fn broadcast(&self, delta: &SettingsMap, timestamp: u64) -> Result<()> {
        if delta.is_empty() {
            return Ok(());
        }
        let message = SyncMessage::settings_update(delta.clone(), timestamp, &self.origin_id);
        self.transport.publish(&message)?;
        self.metrics.record_broadcast_sent();
        debug!(
            "Broadcast {} keys via {} transport",
            delta.len(),
            self.transport.name()
        );
        Ok(())
    }

    // == Subscribe ==
    /// Receiver yielding only sibling `settings-update` messages.
    pub fn subscribe(&self) -> SyncReceiver {
        SyncReceiver {
            inner: self.transport.subscribe(),
            origin_id: self.origin_id.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

// == Sync Receiver ==
pub struct SyncReceiver {
    inner: TransportReceiver,
    origin_id: String,
    metrics: Arc<Metrics>,
}

impl SyncReceiver {
    /// Next message from another context; None once the transport closes.
    pub async fn recv(&mut self) -> Option<SyncMessage> {
        loop {
            let message = self.inner.recv().await?;
            if message.origin_id == self.origin_id {
                trace!("Ignoring own broadcast");
                continue;
            }
            if !message.is_settings_update() {
                debug!("Ignoring broadcast of kind '{}'", message.kind);
                continue;
            }
            self.metrics.record_broadcast_received();
            return Some(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStorage;
    use serde_json::json;
    use std::time::Duration;

    fn delta() -> SettingsMap {
        json!({"primary_color": "#112233"}).as_object().unwrap().clone()
    }

    fn bus(transport: Arc<dyn BroadcastTransport>, origin: &str) -> SyncBus {
        SyncBus::new(transport, origin, Arc::new(Metrics::new()))
    }

    #[tokio::test]
    async fn test_sibling_receives_broadcast() {
        let transport: Arc<dyn BroadcastTransport> = Arc::new(ChannelTransport::new());
        let a = bus(transport.clone(), "ctx-a");
        let b = bus(transport, "ctx-b");
        let mut rx = b.subscribe();

        a.broadcast(&delta(), 7).unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message.origin_id, "ctx-a");
        assert_eq!(message.timestamp, 7);
        assert_eq!(message.delta, delta());
    }

    #[tokio::test]
    async fn test_own_messages_filtered() {
        let transport: Arc<dyn BroadcastTransport> = Arc::new(ChannelTransport::new());
        let a = bus(transport.clone(), "ctx-a");
        let b = bus(transport, "ctx-b");
        let mut own = a.subscribe();

        a.broadcast(&delta(), 1).unwrap();
        b.broadcast(&delta(), 2).unwrap();

        // The first message a sees is b's, its own was skipped.
        let message = own.recv().await.unwrap();
        assert_eq!(message.origin_id, "ctx-b");
    }

    #[tokio::test]
    async fn test_foreign_kind_filtered() {
        let transport = Arc::new(ChannelTransport::new());
        let b = bus(transport.clone(), "ctx-b");
        let mut rx = b.subscribe();

        let mut odd = SyncMessage::settings_update(delta(), 1, "ctx-a");
        odd.kind = "heartbeat".into();
        transport.publish(&odd).unwrap();
        transport
            .publish(&SyncMessage::settings_update(delta(), 2, "ctx-a"))
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().timestamp, 2);
    }

    #[tokio::test]
    async fn test_storage_fallback_between_contexts() {
        let storage = MemoryStorage::new();
        let transport: Arc<dyn BroadcastTransport> = Arc::new(StorageTransport::new(
            Arc::new(storage),
            Duration::from_millis(50),
        ));
        let a = bus(transport.clone(), "ctx-a");
        let b = bus(transport, "ctx-b");
        let mut rx = b.subscribe();

        a.broadcast(&delta(), 3).unwrap();

        let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.delta, delta());
    }

    #[test]
    fn test_empty_delta_not_sent() {
        let transport = Arc::new(ChannelTransport::new());
        let metrics = Arc::new(Metrics::new());
        let a = SyncBus::new(transport, "ctx-a", metrics.clone());

        a.broadcast(&SettingsMap::new(), 1).unwrap();

        let snapshot = metrics.snapshot(&crate::cache::CacheStats::new());
        assert_eq!(snapshot.broadcasts_sent, 0);
    }
}

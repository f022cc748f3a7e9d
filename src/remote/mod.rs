//! Remote Module
//!
//! Request/response exchange with the authoritative settings store.
//! Non-2xx responses and `success = false` envelopes are both failures.

mod http;
mod memory;

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::cache::current_timestamp_ms;
use crate::error::{Result, SyncError};
use crate::metrics::Metrics;
use crate::models::{ResponseEnvelope, SaveRequest, SettingsMap};
use crate::queue::QueueBatch;

pub use http::HttpRemote;
pub use memory::{FailureMode, MemoryRemote};

// == Remote Backend ==
/// Transport to the authoritative store.
#[async_trait]
pub trait RemoteBackend: Send + Sync + Debug {
    async fn save(&self, request: &SaveRequest) -> Result<ResponseEnvelope>;
    async fn load(&self) -> Result<ResponseEnvelope>;
    /// Lightweight reachability check
    async fn ping(&self) -> bool;
}

// == Remote Ack ==
/// Successful write acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteAck {
    pub latency_ms: u64,
    pub data: Option<Value>,
}

// == Remote Client ==
#[derive(Debug, Clone)]
pub struct RemoteClient {
    backend: Arc<dyn RemoteBackend>,
    origin_id: String,
    schema_version: u32,
    metrics: Arc<Metrics>,
}

impl RemoteClient {
    pub fn new(
        backend: Arc<dyn RemoteBackend>,
        origin_id: impl Into<String>,
        schema_version: u32,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            backend,
            origin_id: origin_id.into(),
            schema_version,
            metrics,
        }
    }

    // == Save ==
    /// Sends one batch. Records latency and payload size either way.
    pub async fn save(&self, batch: &QueueBatch) -> Result<RemoteAck> {
        let request = SaveRequest {
            settings: batch.settings.clone(),
            options: batch.options.clone(),
            timestamp: current_timestamp_ms(),
            origin_id: self.origin_id.clone(),
            schema_version: self.schema_version,
        };
        let payload_bytes = serde_json::to_vec(&request).map(|v| v.len()).unwrap_or(0);

        let started = Instant::now();
        let result = self.backend.save(&request).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        self.metrics.record_remote_call(latency_ms, payload_bytes);

        let envelope = result?;
        if !envelope.success {
            return Err(SyncError::Remote(
                envelope
                    .message
                    .unwrap_or_else(|| "remote reported failure".to_string()),
            ));
        }
        debug!(
            "Remote save of batch {} ({} keys) took {} ms",
            batch.id,
            batch.len(),
            latency_ms
        );
        Ok(RemoteAck {
            latency_ms,
            data: envelope.data,
        })
    }

    // == Load ==
    /// Fetches the full remote settings map.
    pub async fn load(&self) -> Result<SettingsMap> {
        let started = Instant::now();
        let result = self.backend.load().await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let envelope = result.map_err(|e| {
            self.metrics.record_remote_call(latency_ms, 0);
            e
        })?;
        let payload_bytes = envelope
            .data
            .as_ref()
            .map(|data| data.to_string().len())
            .unwrap_or(0);
        self.metrics.record_remote_call(latency_ms, payload_bytes);

        if !envelope.success {
            return Err(SyncError::Remote(
                envelope
                    .message
                    .unwrap_or_else(|| "remote reported failure".to_string()),
            ));
        }
        match envelope.data {
            Some(Value::Object(settings)) => Ok(settings),
            None | Some(Value::Null) => Ok(SettingsMap::new()),
            Some(other) => Err(SyncError::Remote(format!(
                "expected settings object, got {}",
                other
            ))),
        }
    }

    pub async fn ping(&self) -> bool {
        self.backend.ping().await
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStats;
    use crate::models::SaveOptions;
    use serde_json::json;

    fn client(remote: &MemoryRemote) -> (RemoteClient, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let client = RemoteClient::new(Arc::new(remote.clone()), "ctx-a", 1, metrics.clone());
        (client, metrics)
    }

    fn batch() -> QueueBatch {
        QueueBatch::new(
            json!({"menu_width": 200}).as_object().unwrap().clone(),
            SaveOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let remote = MemoryRemote::new();
        let (client, metrics) = client(&remote);

        let ack = client.save(&batch()).await.unwrap();
        assert!(ack.data.is_some());

        let loaded = client.load().await.unwrap();
        assert_eq!(loaded["menu_width"], json!(200));

        let request = &remote.saves()[0];
        assert_eq!(request.origin_id, "ctx-a");
        assert_eq!(request.schema_version, 1);

        let snapshot = metrics.snapshot(&CacheStats::new());
        assert_eq!(snapshot.remote_calls, 2);
        assert!(snapshot.payload_bytes > 0);
    }

    #[tokio::test]
    async fn test_rejected_envelope_is_failure() {
        let remote = MemoryRemote::new();
        remote.fail_next(1, FailureMode::Reject);
        let (client, _) = client(&remote);

        let result = client.save(&batch()).await;
        assert!(matches!(result, Err(SyncError::Remote(_))));
        assert!(client.save(&batch()).await.is_ok());
    }

    #[tokio::test]
    async fn test_network_failure_is_recorded() {
        let remote = MemoryRemote::new();
        remote.set_reachable(false);
        let (client, metrics) = client(&remote);

        assert!(matches!(client.save(&batch()).await, Err(SyncError::Network(_))));
        assert!(matches!(client.load().await, Err(SyncError::Network(_))));
        assert!(!client.ping().await);
        assert_eq!(metrics.snapshot(&CacheStats::new()).remote_calls, 2);
    }
}

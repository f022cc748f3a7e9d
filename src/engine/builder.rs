//! Engine construction.
//!
//! Every backend is swappable; anything not supplied gets an in-memory
//! default so a bare `EngineBuilder::new(config).build()` works in tests.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::cache::SettingsCache;
use crate::config::{Config, TransportKind};
use crate::engine::events::{EngineState, EVENT_CHANNEL_CAPACITY};
use crate::engine::{EngineInner, SettingsEngine};
use crate::metrics::Metrics;
use crate::network::NetworkMonitor;
use crate::persistence::{MemoryStorage, PersistenceLayer, StorageBackend};
use crate::queue::{RetryManager, RetryPolicy, SaveQueue};
use crate::remote::{MemoryRemote, RemoteBackend, RemoteClient};
use crate::sanitize::Sanitizer;
use crate::schema::Schema;
use crate::sync::{BroadcastTransport, ChannelTransport, StorageTransport, SyncBus};

pub struct EngineBuilder {
    config: Config,
    schema: Option<Schema>,
    storage: Option<Arc<dyn StorageBackend>>,
    transport: Option<Arc<dyn BroadcastTransport>>,
    remote: Option<Arc<dyn RemoteBackend>>,
    origin_id: Option<String>,
    online: bool,
}

impl EngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            schema: None,
            storage: None,
            transport: None,
            remote: None,
            origin_id: None,
            online: true,
        }
    }

    /// Defaults to [`Schema::admin_defaults`].
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Durable store shared with sibling contexts.
    pub fn storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Overrides the transport chosen by `config.transport`.
    pub fn transport(mut self, transport: Arc<dyn BroadcastTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn remote(mut self, remote: Arc<dyn RemoteBackend>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn origin_id(mut self, origin_id: impl Into<String>) -> Self {
        self.origin_id = Some(origin_id.into());
        self
    }

    /// Initial connectivity, before the first probe.
    pub fn online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    pub fn build(self) -> SettingsEngine {
        let config = self.config;
        let schema = Arc::new(self.schema.unwrap_or_else(Schema::admin_defaults));
        let storage: Arc<dyn StorageBackend> = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let transport: Arc<dyn BroadcastTransport> = match self.transport {
            Some(transport) => transport,
            None => match config.transport {
                TransportKind::Channel => Arc::new(ChannelTransport::new()),
                TransportKind::Storage => Arc::new(StorageTransport::new(
                    storage.clone(),
                    config.broadcast_ttl(),
                )),
            },
        };
        let remote: Arc<dyn RemoteBackend> = self
            .remote
            .unwrap_or_else(|| Arc::new(MemoryRemote::new()));
        let origin_id = self
            .origin_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let metrics = Arc::new(Metrics::new());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let persistence = PersistenceLayer::new(
            storage,
            &origin_id,
            config.schema_version,
            config.snapshot_max_age_ms(),
        );
        let network = NetworkMonitor::new(self.online);
        let remote = RemoteClient::new(remote, &origin_id, config.schema_version, metrics.clone());
        let retry = RetryManager::new(
            RetryPolicy::from_config(&config),
            remote.clone(),
            persistence.clone(),
            network.clone(),
            metrics.clone(),
            events.clone(),
        );
        let queue = SaveQueue::new(retry, config.debounce(), config.max_batch_size);
        let bus = SyncBus::new(transport, &origin_id, metrics.clone());
        let cache = SettingsCache::new(schema.defaults(), config.cache_ttl_ms());

        SettingsEngine {
            inner: Arc::new(EngineInner {
                config,
                origin_id,
                sanitizer: Sanitizer::new(schema),
                cache: Mutex::new(cache),
                persistence,
                bus,
                queue,
                network,
                remote,
                metrics,
                events,
                state: Mutex::new(EngineState::Uninitialized),
                last_error: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }
}

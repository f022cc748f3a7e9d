//! Settings Engine
//!
//! The public face of the crate. A mutation flows through the sanitizer
//! into the cache, is written to the durable snapshot, broadcast to sibling
//! contexts and queued for the remote. Reads are always served from the
//! cache and never wait on I/O.
//!
//! The engine is a cheap `Clone` handle; every clone drives the same
//! context.

mod builder;
pub mod events;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{current_timestamp_ms, SettingsCache};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::models::{validate_key, ChangeSource, SaveOptions, SettingsMap, SyncMessage};
use crate::network::NetworkMonitor;
use crate::persistence::PersistenceLayer;
use crate::queue::{ReplayReport, SaveOutcome, SaveQueue};
use crate::remote::RemoteClient;
use crate::sanitize::{is_style_key, Sanitizer};
use crate::schema::Schema;
use crate::sync::SyncBus;
use crate::tasks;

pub use builder::EngineBuilder;
pub use events::{EngineEvent, EngineState, EngineStatus};

// == Export Format ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// `{version, exportedAt, settings}`
    Json,
    /// `:root { --key-name: value; }` for scalar settings
    Css,
}

impl FromStr for ExportFormat {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "css" => Ok(ExportFormat::Css),
            other => Err(SyncError::Validation {
                key: "format".to_string(),
                reason: format!("unsupported export format '{}'", other),
            }),
        }
    }
}

struct EngineInner {
    config: Config,
    origin_id: String,
    sanitizer: Sanitizer,
    cache: Mutex<SettingsCache>,
    persistence: PersistenceLayer,
    bus: SyncBus,
    queue: SaveQueue,
    network: NetworkMonitor,
    remote: RemoteClient,
    metrics: Arc<Metrics>,
    events: broadcast::Sender<EngineEvent>,
    /// `Saving` is never stored; it is derived from the queue
    state: Mutex<EngineState>,
    last_error: Mutex<Option<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

// == Settings Engine ==
#[derive(Clone)]
pub struct SettingsEngine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for SettingsEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsEngine")
            .field("origin_id", &self.inner.origin_id)
            .field("state", &self.state())
            .finish()
    }
}

impl SettingsEngine {
    /// Engine with in-memory backends and the admin schema.
    pub fn new(config: Config) -> Self {
        EngineBuilder::new(config).build()
    }

    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn origin_id(&self) -> &str {
        &self.inner.origin_id
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn schema(&self) -> &Schema {
        self.inner.sanitizer.schema()
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.inner.network
    }

    /// Platform connectivity signal. Going online triggers a replay.
    pub fn set_online(&self, online: bool) -> bool {
        self.inner.network.set_online(online)
    }

    pub fn state(&self) -> EngineState {
        let state = *self.inner.state.lock();
        if state == EngineState::Ready && self.inner.queue.is_in_flight() {
            EngineState::Saving
        } else {
            state
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    // == Lifecycle ==
    /// Loads settings and starts the background tasks.
    ///
    /// Precedence, lowest first: defaults, remote, fresh local snapshot,
    /// offline queue. Calling it again on a live engine is a no-op.
    pub async fn initialize(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                EngineState::Uninitialized => *state = EngineState::Loading,
                EngineState::Destroyed => {
                    return Err(SyncError::NotReady("engine destroyed".to_string()))
                }
                _ => return Ok(()),
            }
        }
        info!("Initializing settings engine {}", self.inner.origin_id);

        let mut loaded = SettingsMap::new();
        if self.inner.network.is_online() {
            match self.inner.remote.load().await {
                Ok(remote) => {
                    debug!("Loaded {} settings from remote", remote.len());
                    loaded.extend(self.sanitize_delta(&remote));
                }
                Err(e) => {
                    warn!("Initial remote load failed, continuing locally: {}", e);
                    self.record_error(&e);
                }
            }
        }
        if let Some(snapshot) = self.inner.persistence.read_snapshot() {
            debug!("Restoring {} settings from snapshot", snapshot.len());
            loaded.extend(self.sanitize_delta(&snapshot));
        }
        for batch in self.inner.queue.retry().offline_batches() {
            loaded.extend(self.sanitize_delta(&batch.settings));
        }

        let snapshot = {
            let mut cache = self.inner.cache.lock();
            apply_delta(&mut cache, &loaded, current_timestamp_ms());
            cache.snapshot()
        };
        self.persist(&snapshot);

        // Subscribe before going live so no sibling message is missed.
        let receiver = self.inner.bus.subscribe();
        let handles = tasks::spawn_engine_tasks(self, receiver);
        self.inner.tasks.lock().extend(handles);

        *self.inner.state.lock() = EngineState::Ready;
        info!(
            "Settings engine ready with {} settings ({} transport)",
            snapshot.len(),
            self.inner.bus.transport_name()
        );
        self.emit(EngineEvent::Initialized {
            origin_id: self.inner.origin_id.clone(),
            settings: snapshot.len(),
        });
        Ok(())
    }

    /// Stops background work and moves unsent batches to the offline queue.
    pub async fn destroy(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == EngineState::Destroyed {
                return;
            }
            *state = EngineState::Destroyed;
        }
        let handles: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for handle in &handles {
            handle.abort();
        }
        self.inner.queue.shutdown().await;

        let snapshot = self.inner.cache.lock().snapshot();
        self.persist(&snapshot);
        info!(
            "Settings engine {} destroyed, {} batches left in offline queue",
            self.inner.origin_id,
            self.inner.queue.retry().offline_len()
        );
    }

    // == Reads ==
    /// Current value, or the registered default.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.revive_expired();
        self.inner.cache.lock().get(key, None)
    }

    /// Current value, or `fallback` when the cache has nothing live.
    pub fn get_or(&self, key: &str, fallback: Value) -> Value {
        self.revive_expired();
        let value = self.inner.cache.lock().get(key, Some(&fallback));
        value.unwrap_or(fallback)
    }

    /// Values for `keys`; keys with neither a value nor a default are left out.
    pub fn get_multiple<K: AsRef<str>>(&self, keys: &[K]) -> SettingsMap {
        self.revive_expired();
        let mut cache = self.inner.cache.lock();
        keys.iter()
            .filter_map(|key| {
                let key = key.as_ref();
                cache.get(key, None).map(|value| (key.to_string(), value))
            })
            .collect()
    }

    pub fn get_all(&self) -> SettingsMap {
        self.revive_expired();
        self.inner.cache.lock().get_all()
    }

    /// Case-insensitive substring match over keys and string values.
    pub fn search(&self, query: &str) -> SettingsMap {
        let needle = query.trim().to_lowercase();
        self.get_all()
            .into_iter()
            .filter(|(key, value)| {
                needle.is_empty()
                    || key.to_lowercase().contains(&needle)
                    || value
                        .as_str()
                        .map(|s| s.to_lowercase().contains(&needle))
                        .unwrap_or(false)
            })
            .collect()
    }

    // == Writes ==
    /// Sanitizes and stores one value. Returns what was stored.
    pub fn set(&self, key: &str, value: Value, options: SaveOptions) -> Result<Value> {
        self.ensure_writable()?;
        check_key(key)?;

        let mut raw = SettingsMap::new();
        raw.insert(key.to_string(), value);
        let delta = self.sanitize(&raw);
        let stored = delta.get(key).cloned().unwrap_or(Value::Null);
        self.commit(delta, &options);
        Ok(stored)
    }

    /// Sanitizes and stores several values as one change.
    pub fn set_multiple(&self, settings: &SettingsMap, options: SaveOptions) -> Result<SettingsMap> {
        self.ensure_writable()?;
        for key in settings.keys() {
            check_key(key)?;
        }
        let delta = self.sanitize(settings);
        self.commit(delta.clone(), &options);
        Ok(delta)
    }

    /// Registered keys revert to their default; unknown keys are removed
    /// and sent to the remote as `null`. Returns the value afterwards.
    pub fn delete(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_writable()?;
        check_key(key)?;

        let value = match self.schema().default_for(key) {
            Some(default) => default.clone(),
            None => {
                if self.inner.cache.lock().written_at(key).is_none() {
                    return Ok(None);
                }
                Value::Null
            }
        };
        let mut delta = SettingsMap::new();
        delta.insert(key.to_string(), value.clone());
        self.commit(delta, &SaveOptions::default());
        Ok((!value.is_null()).then_some(value))
    }

    /// Every registered key reverts to default; unknown keys are removed.
    pub fn clear(&self) -> Result<SettingsMap> {
        self.ensure_writable()?;
        let mut delta = self.schema().defaults();
        for key in self.get_all().keys() {
            if !self.schema().contains(key) {
                delta.insert(key.clone(), Value::Null);
            }
        }
        self.commit(delta, &SaveOptions::with_source(ChangeSource::Reset));
        Ok(self.get_all())
    }

    /// Reverts `keys` (all registered keys when None) to their defaults.
    /// Unregistered keys are ignored. Returns the values written.
    pub fn reset_to_defaults(&self, keys: Option<&[String]>) -> Result<SettingsMap> {
        self.ensure_writable()?;
        let defaults = self.schema().defaults();
        let delta: SettingsMap = match keys {
            None => defaults,
            Some(keys) => keys
                .iter()
                .filter_map(|key| {
                    let value = defaults.get(key);
                    if value.is_none() {
                        debug!("Reset skipped unregistered key '{}'", key);
                    }
                    value.map(|value| (key.clone(), value.clone()))
                })
                .collect(),
        };
        self.commit(delta.clone(), &SaveOptions::with_source(ChangeSource::Reset));
        Ok(delta)
    }

    // == Import / Export ==
    pub fn export(&self, format: ExportFormat) -> Result<String> {
        let settings = self.get_all();
        match format {
            ExportFormat::Json => {
                let envelope = json!({
                    "version": self.inner.config.schema_version,
                    "exportedAt": chrono::Utc::now().to_rfc3339(),
                    "settings": settings,
                });
                Ok(serde_json::to_string_pretty(&envelope)?)
            }
            ExportFormat::Css => Ok(render_css(&settings)),
        }
    }

    /// Imports a JSON document: a settings object or an export envelope.
    pub fn import(&self, data: &str) -> Result<SettingsMap> {
        let value: Value =
            serde_json::from_str(data).map_err(|e| SyncError::InvalidImport(e.to_string()))?;
        self.import_value(value)
    }

    pub fn import_value(&self, data: Value) -> Result<SettingsMap> {
        self.ensure_writable()?;
        let settings = match data {
            Value::Object(mut map) => {
                let is_envelope = map.contains_key("version") && map.contains_key("settings");
                match map.remove("settings") {
                    Some(Value::Object(settings)) if is_envelope => settings,
                    Some(other) => {
                        map.insert("settings".to_string(), other);
                        map
                    }
                    None => map,
                }
            }
            Value::String(raw) => return self.import(&raw),
            other => {
                return Err(SyncError::InvalidImport(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };
        for key in settings.keys() {
            if let Some(reason) = validate_key(key) {
                return Err(SyncError::InvalidImport(reason));
            }
        }

        let delta = self.sanitize(&settings);
        info!("Importing {} settings", delta.len());
        self.commit(
            delta.clone(),
            &SaveOptions {
                immediate: true,
                silent: false,
                source: ChangeSource::Import,
            },
        );
        Ok(delta)
    }

    // == Remote Sync ==
    /// Pulls the remote map and applies it, leaving alone keys with local
    /// writes the remote has not acknowledged yet. Returns what changed.
    pub async fn refresh(&self) -> Result<SettingsMap> {
        self.ensure_live()?;
        let started = current_timestamp_ms();
        let remote = match self.inner.remote.load().await {
            Ok(remote) => remote,
            Err(e) => {
                self.record_error(&e);
                return Err(e);
            }
        };
        let remote = self.sanitize_delta(&remote);

        let mut unsynced: HashSet<String> = self.inner.queue.retry().unsynced_keys();
        unsynced.extend(self.inner.queue.pending_keys());

        let (changes, snapshot) = {
            let mut cache = self.inner.cache.lock();
            let current = cache.get_all();
            let changes: SettingsMap = remote
                .into_iter()
                .filter(|(key, value)| {
                    !unsynced.contains(key)
                        && cache.written_at(key).map(|at| at <= started).unwrap_or(true)
                        && current.get(key) != Some(value)
                })
                .collect();
            apply_delta(&mut cache, &changes, current_timestamp_ms());
            (changes, cache.snapshot())
        };

        if !changes.is_empty() {
            info!("Refresh applied {} remote changes", changes.len());
            self.persist(&snapshot);
            self.emit(EngineEvent::UiUpdated {
                changes: changes.clone(),
                source: ChangeSource::Remote,
            });
        }
        Ok(changes)
    }

    /// Flushes the pending batch now and waits for the outcome.
    pub async fn force_save(&self) -> SaveOutcome {
        self.inner.queue.force_save().await
    }

    /// Stores `settings` and sends them to the remote right away.
    pub async fn save_settings(&self, settings: &SettingsMap) -> Result<SaveOutcome> {
        self.set_multiple(settings, SaveOptions::default())?;
        Ok(self.force_save().await)
    }

    /// Full settings map. With `bypass_cache` the remote is consulted first,
    /// falling back to the durable snapshot when it cannot be reached.
    pub async fn load_settings(&self, bypass_cache: bool) -> Result<SettingsMap> {
        if !bypass_cache {
            return Ok(self.get_all());
        }
        match self.refresh().await {
            Ok(_) => Ok(self.get_all()),
            Err(e) => {
                warn!("Remote load failed, serving local data: {}", e);
                let mut settings = self.get_all();
                if let Some(snapshot) = self.inner.persistence.read_snapshot() {
                    settings.extend(self.sanitize(&snapshot));
                }
                Ok(settings)
            }
        }
    }

    // == Cross-Context Sync ==
    /// Applies a sibling's change, key by key, where it is not older than
    /// what this context holds. Never re-persists or re-broadcasts.
    pub fn apply_sync_message(&self, message: &SyncMessage) -> SettingsMap {
        if self.is_destroyed() {
            return SettingsMap::new();
        }
        let delta = self.sanitize_delta(&message.delta);
        let applied = {
            let mut cache = self.inner.cache.lock();
            let (removals, updates): (SettingsMap, SettingsMap) =
                delta.into_iter().partition(|(_, value)| value.is_null());
            let mut applied = cache.apply_if_newer(&updates, message.timestamp);
            for key in removals.keys() {
                if cache.remove_if_newer(key, message.timestamp) {
                    applied.insert(key.clone(), Value::Null);
                }
            }
            applied
        };

        if !applied.is_empty() {
            debug!(
                "Applied {} settings from context {}",
                applied.len(),
                message.origin_id
            );
            self.emit(EngineEvent::CrossTabSync {
                changes: applied.clone(),
                origin_id: message.origin_id.clone(),
            });
            self.emit(EngineEvent::UiUpdated {
                changes: applied.clone(),
                source: ChangeSource::CrossTab,
            });
        }
        applied
    }

    // == Maintenance ==
    /// Revives expired cache entries, then refreshes from the remote when
    /// online. Returns the number of revived entries.
    pub async fn sweep(&self) -> usize {
        let revived = self.revive_expired();
        if revived == 0 {
            return 0;
        }
        if self.inner.network.is_online() && !self.is_destroyed() {
            if let Err(e) = self.refresh().await {
                debug!("Post-sweep refresh failed: {}", e);
            }
        }
        revived
    }

    /// Gives every expired entry a fresh lifetime.
    ///
    /// The durable snapshot wins when it was written at or after the entry,
    /// which picks up anything a missed broadcast carried. Otherwise the
    /// stale value is kept, so an older snapshot never rolls back a newer
    /// local write.
    fn revive_expired(&self) -> usize {
        if self.inner.cache.lock().expired_keys().is_empty() {
            return 0;
        }

        let (durable, durable_at) = match self.inner.persistence.read_snapshot_record() {
            Some(snapshot) => (self.sanitize(&snapshot.settings), snapshot.timestamp),
            None => (SettingsMap::new(), 0),
        };
        let (revived, changes) = {
            let mut cache = self.inner.cache.lock();
            let expired = cache.expired_keys();
            let mut changes = SettingsMap::new();
            for key in &expired {
                let Some(entry) = cache.entry(key) else {
                    continue;
                };
                let (stale, written_at) = (entry.value.clone(), entry.written_at);
                match durable.get(key) {
                    Some(value) if durable_at >= written_at && *value != stale => {
                        changes.insert(key.clone(), value.clone());
                        cache.revive(key, value.clone(), durable_at);
                    }
                    _ => cache.revive(key, stale, written_at),
                }
            }
            (expired.len(), changes)
        };
        debug!(
            "Revived {} expired entries, {} changed on disk",
            revived,
            changes.len()
        );
        if !changes.is_empty() {
            self.emit(EngineEvent::UiUpdated {
                changes,
                source: ChangeSource::CrossTab,
            });
        }
        revived
    }

    /// Runs the reachability probe; while online with a backlog, replays it.
    pub async fn probe(&self) -> bool {
        let online = self.inner.network.probe_once(&self.inner.remote).await;
        if online && self.inner.queue.retry().offline_len() > 0 {
            self.inner.queue.retry().replay_offline().await;
        }
        online
    }

    /// Offline → online: replay the offline queue, then resynchronise.
    pub async fn handle_reconnect(&self) -> ReplayReport {
        info!("Connectivity restored, replaying offline queue");
        let report = self.inner.queue.retry().replay_offline().await;
        if let Err(e) = self.refresh().await {
            warn!("Resynchronisation after reconnect failed: {}", e);
        }
        report
    }

    /// Emits `metrics-collected` and returns the snapshot.
    pub fn collect_metrics(&self) -> MetricsSnapshot {
        let metrics = self.get_metrics();
        self.emit(EngineEvent::MetricsCollected {
            metrics: metrics.clone(),
        });
        metrics
    }

    // == Status ==
    pub fn get_status(&self) -> EngineStatus {
        let retry = self.inner.queue.retry();
        EngineStatus {
            state: self.state(),
            online: self.inner.network.is_online(),
            origin_id: self.inner.origin_id.clone(),
            transport: self.inner.bus.transport_name(),
            pending_changes: self.inner.queue.pending_len(),
            retry_queue_size: self.inner.queue.retry_queue_size(),
            cache_entries: self.inner.cache.lock().len(),
            last_saved_at: retry.last_saved_at(),
            last_error: self.inner.last_error.lock().clone(),
        }
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        let stats = self.inner.cache.lock().stats();
        self.inner.metrics.snapshot(&stats)
    }

    // == Internals ==
    fn commit(&self, delta: SettingsMap, options: &SaveOptions) {
        if delta.is_empty() {
            return;
        }
        let timestamp = current_timestamp_ms();
        let snapshot = {
            let mut cache = self.inner.cache.lock();
            apply_delta(&mut cache, &delta, timestamp);
            cache.snapshot()
        };

        if !options.silent {
            self.emit(EngineEvent::UiUpdated {
                changes: delta.clone(),
                source: options.source,
            });
        }
        self.persist(&snapshot);
        if let Err(e) = self.inner.bus.broadcast(&delta, timestamp) {
            warn!("Broadcast failed, siblings will catch up on refresh: {}", e);
            self.record_error(&e);
        }
        self.inner.queue.enqueue(&delta, options);
    }

    fn persist(&self, snapshot: &SettingsMap) {
        if let Err(e) = self.inner.persistence.write_snapshot(snapshot) {
            warn!("Snapshot write failed, running cache-only: {}", e);
            self.record_error(&e);
        }
    }

    fn sanitize(&self, raw: &SettingsMap) -> SettingsMap {
        let (clean, issues) = self.inner.sanitizer.sanitize_with_issues(raw);
        for issue in issues {
            warn!("{}", SyncError::from(issue));
        }
        clean
    }

    /// Like `sanitize`, but keeps `null` on unregistered keys as a removal.
    fn sanitize_delta(&self, raw: &SettingsMap) -> SettingsMap {
        let schema = self.schema();
        let (removals, values): (SettingsMap, SettingsMap) = raw
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .partition(|(key, value)| value.is_null() && !schema.contains(key));
        let mut clean = self.sanitize(&values);
        clean.extend(removals);
        clean
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn record_error(&self, error: &SyncError) {
        *self.inner.last_error.lock() = Some(error.to_string());
    }

    fn is_destroyed(&self) -> bool {
        *self.inner.state.lock() == EngineState::Destroyed
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(SyncError::NotReady("engine destroyed".to_string()));
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        match *self.inner.state.lock() {
            EngineState::Uninitialized => {
                Err(SyncError::NotReady("engine not initialized".to_string()))
            }
            EngineState::Destroyed => Err(SyncError::NotReady("engine destroyed".to_string())),
            _ => Ok(()),
        }
    }
}

/// Writes `delta` into the cache; `null` removes the key.
fn apply_delta(cache: &mut SettingsCache, delta: &SettingsMap, timestamp: u64) {
    let (removals, updates): (SettingsMap, SettingsMap) = delta
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .partition(|(_, value)| value.is_null());
    for key in removals.keys() {
        cache.remove(key);
    }
    cache.update_at(&updates, timestamp);
}

fn check_key(key: &str) -> Result<()> {
    match validate_key(key) {
        Some(reason) => Err(SyncError::Validation {
            key: key.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

fn render_css(settings: &SettingsMap) -> String {
    let mut css = String::from(":root {\n");
    for (key, value) in settings {
        if is_style_key(key) {
            continue;
        }
        let rendered = match value {
            Value::String(s) if !s.is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        if rendered.contains(|c| matches!(c, ';' | '{' | '}')) {
            continue;
        }
        css.push_str(&format!("  --{}: {};\n", key.replace('_', "-"), rendered));
    }
    css.push_str("}\n");
    css
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

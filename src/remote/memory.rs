//! In-memory authoritative store.
//!
//! Backs the tests and the embedded reference store served by the binary.
//! Failures can be injected to exercise retry and offline paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::models::{ResponseEnvelope, SaveRequest, SettingsMap};
use crate::remote::RemoteBackend;

/// How an injected failure presents itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Transport failure (connection refused, non-2xx)
    Network,
    /// Envelope with `success = false`
    Reject,
}

#[derive(Debug, Default)]
struct Injected {
    remaining: u32,
    mode: Option<FailureMode>,
}

#[derive(Debug)]
struct MemoryRemoteInner {
    settings: Mutex<SettingsMap>,
    saves: Mutex<Vec<SaveRequest>>,
    injected: Mutex<Injected>,
    reachable: AtomicBool,
    latency: Mutex<Duration>,
}

// == Memory Remote ==
/// Clones share the same store.
#[derive(Debug, Clone)]
pub struct MemoryRemote {
    inner: Arc<MemoryRemoteInner>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::with_settings(SettingsMap::new())
    }

    pub fn with_settings(settings: SettingsMap) -> Self {
        Self {
            inner: Arc::new(MemoryRemoteInner {
                settings: Mutex::new(settings),
                saves: Mutex::new(Vec::new()),
                injected: Mutex::new(Injected::default()),
                reachable: AtomicBool::new(true),
                latency: Mutex::new(Duration::ZERO),
            }),
        }
    }

    /// Makes the next `count` calls fail.
    pub fn fail_next(&self, count: u32, mode: FailureMode) {
        *self.inner.injected.lock() = Injected {
            remaining: count,
            mode: Some(mode),
        };
    }

    /// Simulates the store becoming (un)reachable.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.lock() = latency;
    }

    /// Every accepted write, oldest first.
    pub fn saves(&self) -> Vec<SaveRequest> {
        self.inner.saves.lock().clone()
    }

    pub fn save_count(&self) -> usize {
        self.inner.saves.lock().len()
    }

    pub fn settings(&self) -> SettingsMap {
        self.inner.settings.lock().clone()
    }

    /// Writes directly, as another user or session would.
    pub fn put(&self, key: impl Into<String>, value: Value) {
        self.inner.settings.lock().insert(key.into(), value);
    }

    // == Envelope Handlers ==
    /// Applies a write; `null` values delete the key.
    pub fn apply_save(&self, request: &SaveRequest) -> ResponseEnvelope {
        let mut settings = self.inner.settings.lock();
        for (key, value) in &request.settings {
            if value.is_null() {
                settings.remove(key);
            } else {
                settings.insert(key.clone(), value.clone());
            }
        }
        self.inner.saves.lock().push(request.clone());
        ResponseEnvelope::ok(Some(Value::Object(settings.clone())))
    }

    pub fn load_envelope(&self) -> ResponseEnvelope {
        ResponseEnvelope::ok(Some(Value::Object(self.settings())))
    }

    async fn gate(&self) -> Result<Option<ResponseEnvelope>> {
        let latency = *self.inner.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !self.inner.reachable.load(Ordering::SeqCst) {
            return Err(SyncError::Network("remote unreachable".to_string()));
        }
        let mut injected = self.inner.injected.lock();
        if injected.remaining == 0 {
            return Ok(None);
        }
        injected.remaining -= 1;
        match injected.mode {
            Some(FailureMode::Network) => Err(SyncError::Network("injected failure".to_string())),
            Some(FailureMode::Reject) => Ok(Some(ResponseEnvelope::failure("injected rejection"))),
            None => Ok(None),
        }
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteBackend for MemoryRemote {
    async fn save(&self, request: &SaveRequest) -> Result<ResponseEnvelope> {
        if let Some(rejection) = self.gate().await? {
            return Ok(rejection);
        }
        Ok(self.apply_save(request))
    }

    async fn load(&self) -> Result<ResponseEnvelope> {
        if let Some(rejection) = self.gate().await? {
            return Ok(rejection);
        }
        Ok(self.load_envelope())
    }

    async fn ping(&self) -> bool {
        self.inner.reachable.load(Ordering::SeqCst)
    }
}

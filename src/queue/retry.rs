//! Retry Manager
//!
//! Sends batches to the remote with exponential backoff. A batch that fails
//! every allowed attempt, or is produced while offline, is demoted to the
//! durable offline queue and replayed oldest-first after reconnecting.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::cache::current_timestamp_ms;
use crate::config::Config;
use crate::engine::EngineEvent;
use crate::error::SyncError;
use crate::metrics::Metrics;
use crate::network::NetworkMonitor;
use crate::persistence::PersistenceLayer;
use crate::queue::QueueBatch;
use crate::remote::RemoteClient;

// == Retry Policy ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first failed attempt
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_retries, config.retry_base_delay())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// `base_delay * 2^retries_so_far`, saturating.
    pub fn delay_for(&self, retries_so_far: u32) -> Duration {
        let factor = 1u32.checked_shl(retries_so_far).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

// == Save Outcome ==
/// What happened to a flushed batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum SaveOutcome {
    /// Nothing was pending
    Idle,
    #[serde(rename_all = "camelCase")]
    Saved {
        batch_id: String,
        keys: Vec<String>,
        attempts: u32,
        latency_ms: u64,
    },
    /// Moved to the offline queue
    #[serde(rename_all = "camelCase")]
    Demoted {
        batch_id: String,
        keys: Vec<String>,
        attempts: u32,
        reason: String,
    },
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, SaveOutcome::Saved { .. })
    }
}

/// Result of one offline-queue replay pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub replayed: usize,
    pub remaining: usize,
}

#[derive(Debug)]
struct RetryInner {
    policy: RetryPolicy,
    remote: RemoteClient,
    persistence: PersistenceLayer,
    network: NetworkMonitor,
    metrics: Arc<Metrics>,
    events: broadcast::Sender<EngineEvent>,
    /// Local view of the durable offline queue, oldest first
    offline: Mutex<VecDeque<QueueBatch>>,
    /// Ids of local batches the durable queue has not accepted yet
    unpersisted: Mutex<HashSet<String>>,
    /// Batch currently being attempted or backing off
    current: Mutex<Option<QueueBatch>>,
    replay_lock: tokio::sync::Mutex<()>,
    closed: watch::Sender<bool>,
    /// Unix milliseconds, 0 = never
    last_saved_at: AtomicU64,
}

// == Retry Manager ==
#[derive(Debug, Clone)]
pub struct RetryManager {
    inner: Arc<RetryInner>,
}

impl RetryManager {
    /// Creates the manager, restoring any offline queue left by an earlier run.
    pub fn new(
        policy: RetryPolicy,
        remote: RemoteClient,
        persistence: PersistenceLayer,
        network: NetworkMonitor,
        metrics: Arc<Metrics>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        let restored: VecDeque<QueueBatch> = persistence.read_offline_queue().into();
        if !restored.is_empty() {
            info!("Restored {} batches from the offline queue", restored.len());
        }
        let (closed, _) = watch::channel(false);

        Self {
            inner: Arc::new(RetryInner {
                policy,
                remote,
                persistence,
                network,
                metrics,
                events,
                offline: Mutex::new(restored),
                unpersisted: Mutex::new(HashSet::new()),
                current: Mutex::new(None),
                replay_lock: tokio::sync::Mutex::new(()),
                closed,
                last_saved_at: AtomicU64::new(0),
            }),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.inner.policy
    }

    // == Process ==
    /// Delivers one batch, retrying with backoff.
    ///
    /// Never fails: a batch that cannot be delivered ends up in the offline
    /// queue. While older batches are still queued, newer ones are queued
    /// behind them so the remote never sees values out of order.
    pub async fn process(&self, batch: QueueBatch) -> SaveOutcome {
        let inner = &self.inner;
        if self.is_closed() {
            return self.demote(batch, "engine shutting down".to_string(), false);
        }
        if !inner.network.is_online() {
            return self.demote(batch, "offline".to_string(), false);
        }
        if self.offline_len() > 0 {
            self.replay_offline().await;
            if self.offline_len() > 0 {
                return self.demote(batch, "older batches still queued".to_string(), false);
            }
        }

        let mut closed = inner.closed.subscribe();
        let mut batch = batch;
        loop {
            batch.attempts += 1;
            batch.next_retry_at = None;
            inner.metrics.record_save_attempt();
            if batch.attempts > 1 {
                inner.metrics.record_retry();
            }
            *inner.current.lock() = Some(batch.clone());

            let error = match inner.remote.save(&batch).await {
                Ok(ack) => {
                    *inner.current.lock() = None;
                    return self.acknowledge(&batch, ack.latency_ms);
                }
                Err(e) => e,
            };

            inner.metrics.record_save_failure();
            batch.last_error = Some(error.to_string());

            if batch.attempts >= inner.policy.max_attempts() {
                warn!(
                    "Batch {} failed {} attempts, moving to offline queue: {}",
                    batch.id, batch.attempts, error
                );
                let exhausted = SyncError::ExhaustedRetries {
                    attempts: batch.attempts,
                    last_error: error.to_string(),
                };
                return self.demote(batch, exhausted.to_string(), true);
            }
            if !error.is_transient() {
                return self.demote(batch, error.to_string(), true);
            }
            if !inner.network.is_online() {
                return self.demote(batch, "offline".to_string(), false);
            }

            let delay = inner.policy.delay_for(batch.attempts - 1);
            batch.next_retry_at = Some(current_timestamp_ms() + delay.as_millis() as u64);
            *inner.current.lock() = Some(batch.clone());
            debug!(
                "Batch {} attempt {} failed ({}), retrying in {:?}",
                batch.id, batch.attempts, error, delay
            );

            let interrupted = tokio::select! {
                _ = tokio::time::sleep(delay) => false,
                _ = closed.wait_for(|closed| *closed) => true,
            };
            if interrupted {
                return self.demote(batch, "engine shutting down".to_string(), false);
            }
        }
    }

    fn acknowledge(&self, batch: &QueueBatch, latency_ms: u64) -> SaveOutcome {
        let inner = &self.inner;
        inner.metrics.record_save_success();
        inner
            .last_saved_at
            .store(current_timestamp_ms(), Ordering::Relaxed);
        info!(
            "Saved batch {} ({} keys) after {} attempt(s)",
            batch.id,
            batch.len(),
            batch.attempts
        );

        let keys = batch.keys();
        let _ = inner.events.send(EngineEvent::SettingsSaved {
            batch_id: batch.id.clone(),
            keys: keys.clone(),
            attempts: batch.attempts,
            latency_ms,
        });
        SaveOutcome::Saved {
            batch_id: batch.id.clone(),
            keys,
            attempts: batch.attempts,
            latency_ms,
        }
    }

    // == Demote ==
    /// Appends `batch` to the durable offline queue.
    ///
    /// `exhausted` marks a batch that used up its retries; those emit
    /// `retry-failed`.
    pub fn demote(&self, batch: QueueBatch, reason: String, exhausted: bool) -> SaveOutcome {
        let inner = &self.inner;
        {
            let mut current = inner.current.lock();
            if current.as_ref().map(|c| c.id == batch.id).unwrap_or(false) {
                *current = None;
            }
        }
        inner.metrics.record_demotion();

        let outcome = SaveOutcome::Demoted {
            batch_id: batch.id.clone(),
            keys: batch.keys(),
            attempts: batch.attempts,
            reason: reason.clone(),
        };
        if exhausted {
            let _ = inner.events.send(EngineEvent::RetryFailed {
                batch_id: batch.id.clone(),
                keys: batch.keys(),
                attempts: batch.attempts,
                error: reason.clone(),
            });
        }
        debug!("Batch {} queued offline: {}", batch.id, reason);

        let mut offline = inner.offline.lock();
        inner.unpersisted.lock().insert(batch.id.clone());
        offline.push_back(batch);
        self.sync_offline(&mut offline, None);
        outcome
    }

    /// Merges the local offline queue into the durable one and adopts the
    /// result as the local view.
    ///
    /// Contexts sharing storage share one durable queue, so it is never
    /// overwritten with just this context's batches. A local batch missing
    /// from storage is kept only while it has never been stored; once stored,
    /// its absence means a sibling delivered it. `delivered` is removed from
    /// both.
    fn sync_offline(&self, offline: &mut VecDeque<QueueBatch>, delivered: Option<&str>) {
        let mut unpersisted = self.inner.unpersisted.lock();
        if let Some(id) = delivered {
            unpersisted.remove(id);
        }
        let local: Vec<QueueBatch> = offline.drain(..).collect();

        let mut merged: Vec<QueueBatch> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for stored in self.inner.persistence.read_offline_queue() {
            if delivered == Some(stored.id.as_str()) || !seen.insert(stored.id.clone()) {
                continue;
            }
            // The local copy carries this context's attempt count.
            let batch = local
                .iter()
                .find(|batch| batch.id == stored.id)
                .cloned()
                .unwrap_or(stored);
            merged.push(batch);
        }
        for batch in local {
            if unpersisted.contains(&batch.id) && seen.insert(batch.id.clone()) {
                merged.push(batch);
            }
        }
        merged.sort_by_key(|batch| batch.created_at);

        match self.inner.persistence.write_offline_queue(&merged) {
            Ok(()) => unpersisted.clear(),
            Err(e) => warn!("Failed to persist offline queue: {}", e),
        }
        *offline = merged.into();
    }

    // == Replay ==
    /// Replays the offline queue once, oldest first, one attempt per batch.
    ///
    /// Stops at the first failure. A replay already running makes this a
    /// no-op.
    pub async fn replay_offline(&self) -> ReplayReport {
        let inner = &self.inner;
        let Ok(_guard) = inner.replay_lock.try_lock() else {
            debug!("Offline replay already running");
            return ReplayReport {
                replayed: 0,
                remaining: self.offline_len(),
            };
        };

        // Pick up batches sibling contexts queued since the last sync.
        self.sync_offline(&mut inner.offline.lock(), None);

        let mut replayed = 0;
        loop {
            if self.is_closed() || !inner.network.is_online() {
                break;
            }
            let front = inner.offline.lock().front().cloned();
            let Some(mut batch) = front else {
                break;
            };

            batch.attempts += 1;
            inner.metrics.record_save_attempt();
            inner.metrics.record_retry();

            match inner.remote.save(&batch).await {
                Ok(ack) => {
                    self.sync_offline(&mut inner.offline.lock(), Some(batch.id.as_str()));
                    self.acknowledge(&batch, ack.latency_ms);
                    replayed += 1;
                }
                Err(e) => {
                    inner.metrics.record_save_failure();
                    warn!("Offline replay stopped at batch {}: {}", batch.id, e);
                    let mut offline = inner.offline.lock();
                    if let Some(front) = offline.front_mut() {
                        if front.id == batch.id {
                            front.attempts = batch.attempts;
                            front.last_error = Some(e.to_string());
                        }
                    }
                    self.sync_offline(&mut offline, None);
                    break;
                }
            }
        }

        let remaining = self.offline_len();
        if replayed > 0 {
            info!(
                "Offline replay sent {} batches, {} remaining",
                replayed, remaining
            );
        }
        ReplayReport {
            replayed,
            remaining,
        }
    }

    // == Introspection ==
    pub fn offline_len(&self) -> usize {
        self.inner.offline.lock().len()
    }

    pub fn offline_batches(&self) -> Vec<QueueBatch> {
        self.inner.offline.lock().iter().cloned().collect()
    }

    pub fn is_online(&self) -> bool {
        self.inner.network.is_online()
    }

    pub fn is_backing_off(&self) -> bool {
        self.inner
            .current
            .lock()
            .as_ref()
            .map(|batch| batch.next_retry_at.is_some())
            .unwrap_or(false)
    }

    /// Offline batches plus the batch backing off, if any.
    pub fn retry_queue_size(&self) -> usize {
        self.offline_len() + usize::from(self.is_backing_off())
    }

    /// Keys written locally but not yet acknowledged by the remote.
    pub fn unsynced_keys(&self) -> HashSet<String> {
        let mut keys: HashSet<String> = self
            .inner
            .offline
            .lock()
            .iter()
            .flat_map(|batch| batch.settings.keys().cloned())
            .collect();
        if let Some(batch) = self.inner.current.lock().as_ref() {
            keys.extend(batch.settings.keys().cloned());
        }
        keys
    }

    pub fn last_saved_at(&self) -> Option<u64> {
        match self.inner.last_saved_at.load(Ordering::Relaxed) {
            0 => None,
            at => Some(at),
        }
    }

    // == Shutdown ==
    /// Stops retrying; a batch backing off is demoted right away.
    pub fn close(&self) {
        self.inner.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }
}

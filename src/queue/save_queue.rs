//! Save Queue
//!
//! Debounces mutations into a single pending batch. Later values win per
//! key. The batch is flushed when the debounce timer fires, on
//! `force_save`, or as soon as it reaches the configured size.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::models::{SaveOptions, SettingsMap};
use crate::queue::{QueueBatch, RetryManager, SaveOutcome};

#[derive(Debug)]
struct SaveQueueInner {
    pending: Mutex<Option<QueueBatch>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    /// Held for the whole of a flush; at most one batch is in flight
    flush_lock: tokio::sync::Mutex<()>,
    in_flight: AtomicBool,
    debounce: Duration,
    max_batch_size: usize,
    retry: RetryManager,
}

// == Save Queue ==
#[derive(Debug, Clone)]
pub struct SaveQueue {
    inner: Arc<SaveQueueInner>,
}

impl SaveQueue {
    pub fn new(retry: RetryManager, debounce: Duration, max_batch_size: usize) -> Self {
        Self {
            inner: Arc::new(SaveQueueInner {
                pending: Mutex::new(None),
                timer: Mutex::new(None),
                flush_lock: tokio::sync::Mutex::new(()),
                in_flight: AtomicBool::new(false),
                debounce,
                max_batch_size: max_batch_size.max(1),
                retry,
            }),
        }
    }

    pub fn retry(&self) -> &RetryManager {
        &self.inner.retry
    }

    // == Enqueue ==
    /// Merges `delta` into the pending batch and (re)starts the debounce
    /// timer, or flushes in the background if the batch is due now.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(&self, delta: &SettingsMap, options: &SaveOptions) {
        if delta.is_empty() {
            return;
        }
        let flush_now = {
            let mut pending = self.inner.pending.lock();
            let batch = pending
                .get_or_insert_with(|| QueueBatch::new(SettingsMap::new(), options.clone()));
            batch.merge(delta, options);
            batch.options.immediate || batch.len() >= self.inner.max_batch_size
        };

        if flush_now {
            self.cancel_timer();
            self.spawn_flush();
        } else {
            self.restart_timer();
        }
    }

    fn restart_timer(&self) {
        let queue = self.clone();
        let debounce = self.inner.debounce;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            // The flush runs in its own task; restarting the timer must
            // never cancel a save already under way.
            queue.spawn_flush();
        });
        if let Some(previous) = self.inner.timer.lock().replace(handle) {
            previous.abort();
        }
    }

    fn cancel_timer(&self) {
        if let Some(timer) = self.inner.timer.lock().take() {
            timer.abort();
        }
    }

    fn spawn_flush(&self) {
        let queue = self.clone();
        tokio::spawn(async move {
            queue.flush().await;
        });
    }

    // == Flush ==
    /// Sends whatever is pending.
    ///
    /// A flush requested while another runs waits for it, then takes what
    /// has accumulated since.
    pub async fn flush(&self) -> SaveOutcome {
        let _guard = self.inner.flush_lock.lock().await;
        let pending = self.inner.pending.lock().take();
        let Some(batch) = pending else {
            return SaveOutcome::Idle;
        };

        debug!("Flushing batch {} with {} keys", batch.id, batch.len());
        self.inner.in_flight.store(true, Ordering::SeqCst);
        let outcome = self.inner.retry.process(batch).await;
        self.inner.in_flight.store(false, Ordering::SeqCst);
        outcome
    }

    /// Skips the debounce window and flushes now.
    pub async fn force_save(&self) -> SaveOutcome {
        self.cancel_timer();
        self.flush().await
    }

    // == Introspection ==
    pub fn pending_keys(&self) -> Vec<String> {
        self.inner
            .pending
            .lock()
            .as_ref()
            .map(QueueBatch::keys)
            .unwrap_or_default()
    }

    pub fn pending_len(&self) -> usize {
        self.inner
            .pending
            .lock()
            .as_ref()
            .map(QueueBatch::len)
            .unwrap_or(0)
    }

    /// The retry backlog, plus the pending batch while offline since
    /// demotion is the only place it can go.
    pub fn retry_queue_size(&self) -> usize {
        let pending_offline =
            !self.inner.retry.is_online() && self.inner.pending.lock().is_some();
        self.inner.retry.retry_queue_size() + usize::from(pending_offline)
    }

    pub fn is_in_flight(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    // == Shutdown ==
    /// Stops the timer and demotes the pending batch and any batch still
    /// retrying to the offline queue.
    pub async fn shutdown(&self) {
        self.cancel_timer();
        self.inner.retry.close();

        let pending = self.inner.pending.lock().take();
        if let Some(batch) = pending {
            self.inner
                .retry
                .demote(batch, "engine shutting down".to_string(), false);
        }
        // Wait for an in-flight flush to finish or demote its batch.
        let _guard = self.inner.flush_lock.lock().await;
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineEvent;
    use crate::metrics::Metrics;
    use crate::network::NetworkMonitor;
    use crate::persistence::{MemoryStorage, PersistenceLayer};
    use crate::queue::RetryPolicy;
    use crate::remote::{MemoryRemote, RemoteClient};
    use serde_json::json;
    use tokio::sync::broadcast;

    fn queue(debounce_ms: u64, max_batch_size: usize) -> (SaveQueue, MemoryRemote) {
        let metrics = Arc::new(Metrics::new());
        let remote = MemoryRemote::new();
        let retry = RetryManager::new(
            RetryPolicy::new(3, Duration::from_millis(5)),
            RemoteClient::new(Arc::new(remote.clone()), "ctx", 1, metrics.clone()),
            PersistenceLayer::new(Arc::new(MemoryStorage::new()), "ctx", 1, 86_400_000),
            NetworkMonitor::new(true),
            metrics,
            broadcast::channel::<EngineEvent>(16).0,
        );
        (
            SaveQueue::new(retry, Duration::from_millis(debounce_ms), max_batch_size),
            remote,
        )
    }

    fn delta(value: serde_json::Value) -> SettingsMap {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_debounce_merges_into_one_write() {
        let (queue, remote) = queue(50, 50);

        queue.enqueue(&delta(json!({"menu_width": 180})), &SaveOptions::default());
        queue.enqueue(&delta(json!({"menu_width": 200})), &SaveOptions::default());
        assert_eq!(queue.pending_keys(), vec!["menu_width".to_string()]);

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(remote.save_count(), 1);
        assert_eq!(remote.saves()[0].settings["menu_width"], 200);
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_force_save_skips_window() {
        let (queue, remote) = queue(10_000, 50);

        queue.enqueue(&delta(json!({"font_size": 16})), &SaveOptions::default());
        let outcome = queue.force_save().await;

        assert!(outcome.is_saved());
        assert_eq!(remote.save_count(), 1);
        assert_eq!(queue.force_save().await, SaveOutcome::Idle);
    }

    #[tokio::test]
    async fn test_size_threshold_flushes() {
        let (queue, remote) = queue(10_000, 2);

        queue.enqueue(&delta(json!({"a": "1"})), &SaveOptions::default());
        queue.enqueue(&delta(json!({"b": "2"})), &SaveOptions::default());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(remote.save_count(), 1);
        assert_eq!(remote.saves()[0].settings.len(), 2);
    }

    #[tokio::test]
    async fn test_immediate_option_flushes() {
        let (queue, remote) = queue(10_000, 50);

        queue.enqueue(&delta(json!({"compact_mode": true})), &SaveOptions::immediate());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(remote.save_count(), 1);
        assert!(remote.saves()[0].options.immediate);
    }

    #[tokio::test]
    async fn test_writes_during_flush_go_to_next_batch() {
        let (queue, remote) = queue(10_000, 50);
        remote.set_latency(Duration::from_millis(100));

        queue.enqueue(&delta(json!({"menu_width": 180})), &SaveOptions::default());
        let first = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.force_save().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.is_in_flight());

        queue.enqueue(&delta(json!({"menu_width": 200})), &SaveOptions::default());
        let second = queue.force_save().await;
        first.await.unwrap();

        assert!(second.is_saved());
        let saves = remote.saves();
        assert_eq!(saves.len(), 2);
        assert_eq!(saves[1].settings["menu_width"], 200);
    }

    #[tokio::test]
    async fn test_shutdown_demotes_pending() {
        let (queue, remote) = queue(10_000, 50);

        queue.enqueue(&delta(json!({"menu_width": 200})), &SaveOptions::default());
        queue.shutdown().await;

        assert_eq!(remote.save_count(), 0);
        assert_eq!(queue.retry().offline_len(), 1);
    }

    #[tokio::test]
    async fn test_pending_batch_counts_as_retry_backlog_while_offline() {
        let metrics = Arc::new(Metrics::new());
        let network = NetworkMonitor::new(false);
        let retry = RetryManager::new(
            RetryPolicy::new(3, Duration::from_millis(5)),
            RemoteClient::new(Arc::new(MemoryRemote::new()), "ctx", 1, metrics.clone()),
            PersistenceLayer::new(Arc::new(MemoryStorage::new()), "ctx", 1, 86_400_000),
            network.clone(),
            metrics,
            broadcast::channel::<EngineEvent>(16).0,
        );
        let queue = SaveQueue::new(retry, Duration::from_millis(50), 50);

        queue.enqueue(&delta(json!({"menu_width": 200})), &SaveOptions::default());
        // Still inside the debounce window.
        assert_eq!(queue.retry_queue_size(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(queue.retry_queue_size(), 1);

        network.set_online(true);
        assert_eq!(queue.retry().replay_offline().await.replayed, 1);
        assert_eq!(queue.retry_queue_size(), 0);
    }
}

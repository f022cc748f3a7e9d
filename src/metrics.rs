//! Engine Metrics
//!
//! Observational counters shared by the queue, retry manager, remote client
//! and sync bus. Nothing reads these to make decisions.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::cache::CacheStats;

// == Metrics ==
/// Lock-free counters, shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct Metrics {
    save_attempts: AtomicU64,
    save_successes: AtomicU64,
    save_failures: AtomicU64,
    retry_attempts: AtomicU64,
    batches_demoted: AtomicU64,
    remote_calls: AtomicU64,
    remote_latency_ms_total: AtomicU64,
    payload_bytes: AtomicU64,
    broadcasts_sent: AtomicU64,
    broadcasts_received: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_save_attempt(&self) {
        self.save_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_save_success(&self) {
        self.save_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_save_failure(&self) {
        self.save_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retry_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_demotion(&self) {
        self.batches_demoted.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one remote round trip.
    pub fn record_remote_call(&self, latency_ms: u64, payload_bytes: usize) {
        self.remote_calls.fetch_add(1, Ordering::Relaxed);
        self.remote_latency_ms_total
            .fetch_add(latency_ms, Ordering::Relaxed);
        self.payload_bytes
            .fetch_add(payload_bytes as u64, Ordering::Relaxed);
    }

    pub fn record_broadcast_sent(&self) {
        self.broadcasts_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broadcast_received(&self) {
        self.broadcasts_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy, combined with the cache's read statistics.
    pub fn snapshot(&self, cache: &CacheStats) -> MetricsSnapshot {
        let remote_calls = self.remote_calls.load(Ordering::Relaxed);
        let latency_total = self.remote_latency_ms_total.load(Ordering::Relaxed);
        let average_latency_ms = if remote_calls == 0 {
            0.0
        } else {
            latency_total as f64 / remote_calls as f64
        };

        MetricsSnapshot {
            save_attempts: self.save_attempts.load(Ordering::Relaxed),
            save_successes: self.save_successes.load(Ordering::Relaxed),
            save_failures: self.save_failures.load(Ordering::Relaxed),
            retry_attempts: self.retry_attempts.load(Ordering::Relaxed),
            batches_demoted: self.batches_demoted.load(Ordering::Relaxed),
            cache_hits: cache.hits,
            cache_misses: cache.misses,
            cache_hit_rate: cache.hit_rate(),
            remote_calls,
            average_latency_ms,
            payload_bytes: self.payload_bytes.load(Ordering::Relaxed),
            broadcasts_sent: self.broadcasts_sent.load(Ordering::Relaxed),
            broadcasts_received: self.broadcasts_received.load(Ordering::Relaxed),
        }
    }
}

// == Metrics Snapshot ==
/// Serializable view returned by `get_metrics` and the `metrics-collected` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub save_attempts: u64,
    pub save_successes: u64,
    pub save_failures: u64,
    pub retry_attempts: u64,
    pub batches_demoted: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub remote_calls: u64,
    pub average_latency_ms: f64,
    pub payload_bytes: u64,
    pub broadcasts_sent: u64,
    pub broadcasts_received: u64,
}

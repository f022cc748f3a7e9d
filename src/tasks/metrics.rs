//! Metrics Collection Task
//!
//! Emits a `metrics-collected` event at a fixed interval.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::SettingsEngine;

/// Spawns the metrics collector.
pub fn spawn_metrics_task(engine: SettingsEngine, interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting metrics collection with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            let metrics = engine.collect_metrics();
            debug!(
                "Metrics: {} saves ({} failed), {} retries, hit rate {:.2}",
                metrics.save_attempts,
                metrics.save_failures,
                metrics.retry_attempts,
                metrics.cache_hit_rate
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::EngineEvent;

    #[tokio::test]
    async fn test_metrics_event_emitted() {
        let engine = SettingsEngine::new(Config::default());
        let mut events = engine.subscribe();

        let handle = spawn_metrics_task(engine.clone(), 1);
        let event = tokio::time::timeout(Duration::from_secs(3), events.recv())
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(event, EngineEvent::MetricsCollected { .. }));
        handle.abort();
    }
}

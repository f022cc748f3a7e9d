//! Cache Sweep Task
//!
//! Background task that periodically revives expired cache entries.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::SettingsEngine;

/// Spawns a background task that periodically sweeps the engine's cache.
///
/// Expired entries are revived from the durable snapshot, and a refresh
/// from the remote follows when online (see [`SettingsEngine::sweep`]).
///
/// # Arguments
/// * `engine` - Engine whose cache is swept
/// * `interval_secs` - Interval in seconds between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task, aborted by `destroy()`.
pub fn spawn_sweep_task(engine: SettingsEngine, interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting cache sweep task with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            let revived = engine.sweep().await;
            if revived > 0 {
                info!("Cache sweep: revived {} expired entries", revived);
            } else {
                debug!("Cache sweep: no expired entries found");
            }
        }
    })
}

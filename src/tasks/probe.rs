//! Reachability Probe Task
//!
//! Pings the remote at a fixed interval. While online with a non-empty
//! offline queue each tick also replays it, so the probe doubles as the
//! retry timer for demoted batches.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::SettingsEngine;

/// Spawns the reachability probe.
///
/// # Arguments
/// * `engine` - Engine whose network monitor is updated
/// * `interval_secs` - Interval in seconds between probes
pub fn spawn_probe_task(engine: SettingsEngine, interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting reachability probe with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            let online = engine.probe().await;
            debug!(
                "Reachability probe: remote {}",
                if online { "reachable" } else { "unreachable" }
            );
        }
    })
}

//! Background Tasks Module
//!
//! Long-running tasks owned by an engine. Each is a `tokio::spawn`ed loop
//! whose `JoinHandle` the engine keeps and aborts on `destroy()`.
//!
//! # Tasks
//! - Sweep: revives expired cache entries and repopulates them
//! - Probe: checks remote reachability, doubles as the offline retry timer
//! - Metrics: emits `metrics-collected` at a fixed interval
//! - Sync listener: applies sibling broadcasts
//! - Reconnect watcher: replays the offline queue on offline → online

mod listener;
mod metrics;
mod probe;
mod sweep;

use tokio::task::JoinHandle;

use crate::engine::SettingsEngine;
use crate::sync::SyncReceiver;

pub use listener::{spawn_reconnect_watcher, spawn_sync_listener};
pub use metrics::spawn_metrics_task;
pub use probe::spawn_probe_task;
pub use sweep::spawn_sweep_task;

/// Starts every background task for `engine`.
pub fn spawn_engine_tasks(engine: &SettingsEngine, receiver: SyncReceiver) -> Vec<JoinHandle<()>> {
    let config = engine.config();
    vec![
        spawn_sync_listener(engine.clone(), receiver),
        spawn_reconnect_watcher(engine.clone()),
        spawn_sweep_task(engine.clone(), config.sweep_interval),
        spawn_probe_task(engine.clone(), config.probe_interval),
        spawn_metrics_task(engine.clone(), config.metrics_interval),
    ]
}

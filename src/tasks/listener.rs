//! Event-driven tasks: sibling broadcasts and connectivity transitions.

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::SettingsEngine;
use crate::sync::SyncReceiver;

/// Applies every sibling broadcast until the transport closes.
pub fn spawn_sync_listener(engine: SettingsEngine, mut receiver: SyncReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Sync listener started for {}", engine.origin_id());
        while let Some(message) = receiver.recv().await {
            engine.apply_sync_message(&message);
        }
        info!("Sync transport closed, listener stopped");
    })
}

/// Replays the offline queue and resynchronises on every offline → online
/// transition.
pub fn spawn_reconnect_watcher(engine: SettingsEngine) -> JoinHandle<()> {
    let mut state = engine.network().subscribe();

    tokio::spawn(async move {
        loop {
            if state.changed().await.is_err() {
                break;
            }
            let online = *state.borrow_and_update();
            if online {
                engine.handle_reconnect().await;
            }
        }
    })
}

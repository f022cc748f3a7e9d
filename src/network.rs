//! Network Monitor
//!
//! Tracks whether the authoritative store is believed reachable. Platform
//! signals arrive through `set_online`; the periodic probe calls
//! `probe_once`. Transitions are observable through a watch channel.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::remote::RemoteClient;

// == Network Monitor ==
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    state: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Records the current connectivity. Returns true on a transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            info!(
                "Network state changed: {}",
                if online { "online" } else { "offline" }
            );
        }
        changed
    }

    /// Receiver observing every transition.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    // == Probe ==
    /// Pings the remote and records the result.
    pub async fn probe_once(&self, remote: &RemoteClient) -> bool {
        let reachable = remote.ping().await;
        self.set_online(reachable);
        reachable
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::remote::MemoryRemote;

    #[test]
    fn test_transitions_reported_once() {
        let monitor = NetworkMonitor::new(true);
        assert!(!monitor.set_online(true));
        assert!(monitor.set_online(false));
        assert!(!monitor.set_online(false));
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn test_subscriber_sees_transition() {
        let monitor = NetworkMonitor::new(false);
        let mut rx = monitor.subscribe();

        monitor.set_online(true);

        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_probe_follows_remote() {
        let remote = MemoryRemote::new();
        let client = RemoteClient::new(
            std::sync::Arc::new(remote.clone()),
            "ctx",
            1,
            std::sync::Arc::new(Metrics::new()),
        );
        let monitor = NetworkMonitor::new(true);

        remote.set_reachable(false);
        assert!(!monitor.probe_once(&client).await);
        assert!(!monitor.is_online());

        remote.set_reachable(true);
        assert!(monitor.probe_once(&client).await);
        assert!(monitor.is_online());
    }
}

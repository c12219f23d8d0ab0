//! Connectivity state.
//!
//! The host application reports reachability changes through
//! [`NetworkMonitor::set_online`]; the sync manager watches the channel and
//! pauses or resumes draining.

use std::sync::Arc;
use tokio::sync::watch;

/// Shared online/offline flag. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Report connectivity. Returns whether the state changed; subscribers
    /// are only woken on a change.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "Connectivity changed");
        }
        changed
    }

    /// Receiver notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

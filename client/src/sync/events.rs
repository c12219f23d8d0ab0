//! In-process event bus for sync lifecycle events.
//!
//! Listeners are plain callbacks registered under a generated id. Emission is
//! synchronous and isolates listeners from each other: a panicking listener
//! is logged and the remaining listeners still run.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use ferry_engine::SyncEvent;

/// Identifier returned by [`EventBus::add_listener`].
pub type ListenerId = String;

/// A registered event callback.
pub type Listener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Fan-out of [`SyncEvent`]s to registered listeners.
#[derive(Default)]
pub struct EventBus {
    listeners: DashMap<ListenerId, Listener>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    ///
    /// Returns the listener ID.
    pub fn add_listener(&self, listener: impl Fn(&SyncEvent) + Send + Sync + 'static) -> ListenerId {
        let id = uuid::Uuid::new_v4().to_string();
        self.listeners.insert(id.clone(), Arc::new(listener));

        tracing::debug!(listener_id = %id, "Event listener registered");
        id
    }

    /// Unregister a listener. Returns whether it was registered.
    pub fn remove_listener(&self, id: &str) -> bool {
        let removed = self.listeners.remove(id).is_some();
        if removed {
            tracing::debug!(listener_id = %id, "Event listener removed");
        }
        removed
    }

    /// Deliver an event to every listener.
    ///
    /// Returns the number of listeners that handled it without panicking.
    pub fn emit(&self, event: &SyncEvent) -> usize {
        // Snapshot first so listeners may add or remove listeners.
        let listeners: Vec<(ListenerId, Listener)> = self
            .listeners
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut delivered = 0;
        for (id, listener) in listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::error!(listener_id = %id, event = event.kind(), "Event listener panicked");
                }
            }
        }
        delivered
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.listeners.clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

//! Synchronization runtime: durable queue, remote backends, and the manager
//! that drains one into the other.

mod backend;
mod events;
mod http;
mod manager;
mod network;
mod queue;
mod timers;

pub use backend::{RemoteBackend, RemoteError};
pub use events::{EventBus, Listener, ListenerId};
pub use http::HttpBackend;
pub use manager::{DrainReport, SyncManager, CONFLICT_ERROR, DEFAULT_SYNC_INTERVAL, MIN_SYNC_INTERVAL};
pub use network::NetworkMonitor;
pub use queue::SyncQueue;
pub use timers::RetryTimers;

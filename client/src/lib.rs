//! # Ferry Client
//!
//! Runtime half of Ferry: a SQLite-backed local store, the durable sync
//! queue, and the sync manager that pushes queued changes to a remote
//! backend while the device is online.
//!
//! Local reads and writes never wait on the network. Every write goes to the
//! [`LocalStore`] first and leaves a queue item behind; the [`SyncManager`]
//! drains the queue in priority order, retries transient failures with
//! exponential backoff, and reports its progress as [`SyncEvent`]s.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use ferry_client::{
//!     HttpBackend, LocalStore, NetworkMonitor, SyncConfig, SyncManager, SystemClock,
//! };
//! use ferry_engine::{CollectionDef, IndexDef, Schema};
//!
//! # async fn run() -> ferry_client::Result<()> {
//! let schema = Schema::new(1).with_collection(
//!     CollectionDef::new("exercises", "id").with_index(IndexDef::new("by_category", "category")),
//! );
//! let store = LocalStore::open("ferry.db", schema).await?;
//!
//! let config = SyncConfig::default();
//! let backend = HttpBackend::new("https://api.example.com", config.request_timeout)?;
//! let manager = SyncManager::new(
//!     store,
//!     Arc::new(backend),
//!     NetworkMonitor::new(true),
//!     Arc::new(SystemClock),
//!     config,
//! );
//!
//! manager.register_entity("exercise", "exercises")?;
//! manager.add_event_listener(|event| println!("{}", event.kind()));
//! manager.start_auto_sync(ferry_client::sync::DEFAULT_SYNC_INTERVAL);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod repository;
pub mod sync;

pub use clock::SystemClock;
pub use config::{Config, ConfigError, SyncConfig};
pub use db::{LocalStore, StoreTransaction};
pub use error::{Error, Result};
pub use ferry_engine::SyncEvent;
pub use repository::{new_entity_id, Entity, Repository};
pub use sync::{
    DrainReport, HttpBackend, NetworkMonitor, RemoteBackend, RemoteError, SyncManager, SyncQueue,
    CONFLICT_ERROR, DEFAULT_SYNC_INTERVAL, MIN_SYNC_INTERVAL,
};

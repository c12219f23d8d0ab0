//! # Ferry Engine
//!
//! Storage-agnostic core of a local-first persistence layer.
//!
//! This crate holds the logic that does not depend on where bytes live or how
//! the network behaves: collection schemas and key paths, in-memory query
//! evaluation, synchronization metadata attached to stored records, the sync
//! queue item model with its state machine and retry policy, lifecycle events,
//! conflict policy, and store snapshots.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches files, sockets, or timers
//! - **Injected time**: every time-dependent call takes a timestamp or a [`Clock`]
//! - **Typed states**: queue transitions are validated, illegal moves are errors
//!
//! ## Core Concepts
//!
//! ### Collections
//!
//! A [`Schema`] declares named collections, each with a primary key path and
//! optional secondary indexes ([`IndexDef`]). Key paths use dot notation.
//!
//! ### Stored records
//!
//! [`StoredRecord`] wraps a domain payload with [`SyncMetadata`]
//! (`needsSync`, `isLocalOnly`, `lastSyncAt`, `conflictData`, timestamps).
//!
//! ### Sync queue
//!
//! Every local mutation produces one [`SyncQueueItem`]. Items move through
//! [`SyncStatus`] states:
//! - `pending` → `in_progress` → `completed`
//! - `in_progress` → `pending` (retry with exponential backoff) or `failed`
//! - `pending`/`in_progress` → `cancelled`
//!
//! Items drain ordered by [`SyncPriority`] and then creation time.
//!
//! ## Quick Start
//!
//! ```rust
//! use ferry_engine::{Change, RetryPolicy, SyncPriority, SyncQueueItem, SyncStatus};
//! use serde_json::json;
//!
//! let policy = RetryPolicy::default();
//! let mut item = SyncQueueItem::new(
//!     "exercise",
//!     "ex-1",
//!     Change::Create { document: json!({"id": "ex-1", "name": "Squat"}) },
//!     SyncPriority::High,
//!     policy.max_retries,
//!     1_000,
//! );
//!
//! item.start(1_000).unwrap();
//! let outcome = item.record_failure("timeout", 1_500, &policy).unwrap();
//! assert_eq!(item.status, SyncStatus::Pending);
//! assert_eq!(outcome.retry_in().unwrap().as_secs(), 2);
//! assert!(!item.is_due(2_000));
//! assert!(item.is_due(3_500));
//! ```

pub mod clock;
pub mod conflict;
pub mod error;
pub mod event;
pub mod query;
pub mod queue;
pub mod record;
pub mod retry;
pub mod schema;
pub mod snapshot;

// Re-export main types at crate root
pub use clock::{Clock, ManualClock};
pub use conflict::{ConflictStrategy, Resolution, SyncConflict};
pub use error::Error;
pub use event::{SyncEvent, SyncRunState, SyncStats};
pub use query::{Direction, Filter, FilterOp, OrderBy, QueryOptions};
pub use queue::{
    select_batch, sync_queue_collection, Change, QueueItemId, SyncOperation, SyncPriority,
    SyncQueueItem, SyncStatus, SYNC_QUEUE_COLLECTION,
};
pub use record::{RecordKey, StoredRecord, SyncMetadata};
pub use retry::{FailureOutcome, RetryPolicy};
pub use schema::{CollectionDef, IndexDef, Schema};
pub use snapshot::{SnapshotMetadata, StoreSnapshot, SNAPSHOT_FORMAT_VERSION};

/// Type aliases for clarity
pub type CollectionName = String;
pub type EntityType = String;
pub type SchemaVersion = u32;
/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

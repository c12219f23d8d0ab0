//! Sync lifecycle events and status snapshots.

use crate::{SyncConflict, SyncQueueItem, SyncStatus, Timestamp};
use serde::{Deserialize, Serialize};

/// Event published by the sync manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SyncEvent {
    /// A drain began
    SyncStarted { timestamp: Timestamp },
    /// Items attempted so far in the current drain
    SyncProgress { completed: usize, total: usize },
    /// A drain ended without a connectivity error
    SyncCompleted {
        duration_ms: u64,
        items_processed: usize,
    },
    /// A drain or item failed
    SyncFailed {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_in_ms: Option<u64>,
    },
    /// The remote reported a diverged version
    ConflictDetected { conflict: SyncConflict },
    /// Connectivity changed; `enabled` means offline
    OfflineMode { enabled: bool },
    /// Local storage crossed the warning threshold
    StorageQuotaWarning { usage_percent: f64 },
}

impl SyncEvent {
    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::SyncStarted { .. } => "sync_started",
            SyncEvent::SyncProgress { .. } => "sync_progress",
            SyncEvent::SyncCompleted { .. } => "sync_completed",
            SyncEvent::SyncFailed { .. } => "sync_failed",
            SyncEvent::ConflictDetected { .. } => "conflict_detected",
            SyncEvent::OfflineMode { .. } => "offline_mode",
            SyncEvent::StorageQuotaWarning { .. } => "storage_quota_warning",
        }
    }
}

/// Point-in-time view of the sync manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunState {
    pub is_online: bool,
    pub is_syncing: bool,
    /// End of the last drain that ran
    pub last_sync: Option<Timestamp>,
    /// Queue items still pending
    pub pending_operations: usize,
    pub last_error: Option<String>,
}

/// Queue item counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl SyncStats {
    /// Count one item.
    pub fn record(&mut self, status: SyncStatus) {
        match status {
            SyncStatus::Pending => self.pending += 1,
            SyncStatus::InProgress => self.in_progress += 1,
            SyncStatus::Completed => self.completed += 1,
            SyncStatus::Failed => self.failed += 1,
            SyncStatus::Cancelled => self.cancelled += 1,
        }
    }

    /// Tally a set of items.
    pub fn tally<'a>(items: impl IntoIterator<Item = &'a SyncQueueItem>) -> Self {
        items.into_iter().fold(Self::default(), |mut stats, item| {
            stats.record(item.status);
            stats
        })
    }

    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.completed + self.failed + self.cancelled
    }
}

//! Sync queue items and their state machine.
//!
//! Every local mutation produces exactly one [`SyncQueueItem`]. Items are
//! ordinary documents in the [`SYNC_QUEUE_COLLECTION`] collection; this module
//! only knows how they look and how they may change.
//!
//! ```text
//! PENDING ──start──▶ IN_PROGRESS ──complete──▶ COMPLETED
//!    ▲                   │
//!    └──retry (backoff)──┤──exhausted / fatal──▶ FAILED ──requeue──▶ PENDING
//!
//! PENDING | IN_PROGRESS ──cancel──▶ CANCELLED
//! ```

use crate::{
    error::Result, CollectionDef, EntityType, Error, FailureOutcome, IndexDef, RetryPolicy,
    Timestamp,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// Store-assigned, auto-incrementing queue item identifier.
pub type QueueItemId = i64;

/// Name of the collection holding queue items.
pub const SYNC_QUEUE_COLLECTION: &str = "syncQueue";

/// Definition of the queue collection and its indexes.
pub fn sync_queue_collection() -> CollectionDef {
    CollectionDef::new(SYNC_QUEUE_COLLECTION, "id")
        .auto_increment()
        .with_index(IndexDef::new("by_status", "status"))
        .with_index(IndexDef::new("by_created_at", "createdAt"))
        .with_index(IndexDef::new("by_priority", "priority"))
        .with_index(IndexDef::new("by_entity", "entityId"))
}

/// Kind of remote mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncOperation::Create => "create",
            SyncOperation::Update => "update",
            SyncOperation::Delete => "delete",
        })
    }
}

/// Queue item status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl SyncStatus {
    /// Stored representation, also the `by_status` index value.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::InProgress => "in_progress",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
            SyncStatus::Cancelled => "cancelled",
        }
    }

    /// No automatic transition leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Completed | SyncStatus::Failed | SyncStatus::Cancelled
        )
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drain priority; lower numbers drain first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SyncPriority {
    High = 1,
    #[default]
    Medium = 2,
    Low = 3,
}

impl From<SyncPriority> for u8 {
    fn from(priority: SyncPriority) -> Self {
        priority as u8
    }
}

impl TryFrom<u8> for SyncPriority {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(SyncPriority::High),
            2 => Ok(SyncPriority::Medium),
            3 => Ok(SyncPriority::Low),
            other => Err(format!("invalid sync priority: {other}")),
        }
    }
}

/// The mutation a queue item carries to the remote.
///
/// Operation and payload form one tagged union so a delete can never carry a
/// document and dispatch is an exhaustive match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum Change {
    Create { document: Value },
    Update { document: Value },
    Delete,
}

impl Change {
    pub fn operation(&self) -> SyncOperation {
        match self {
            Change::Create { .. } => SyncOperation::Create,
            Change::Update { .. } => SyncOperation::Update,
            Change::Delete => SyncOperation::Delete,
        }
    }

    /// Document sent with creates and updates.
    pub fn document(&self) -> Option<&Value> {
        match self {
            Change::Create { document } | Change::Update { document } => Some(document),
            Change::Delete => None,
        }
    }
}

/// A pending remote mutation and its retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    /// Assigned by the store on insert
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<QueueItemId>,
    /// Remote entity type
    pub entity_type: EntityType,
    /// Remote entity identifier
    pub entity_id: String,
    /// Operation plus payload
    pub change: Change,
    pub status: SyncStatus,
    pub priority: SyncPriority,
    /// Failed attempts so far
    pub retry_count: u32,
    pub max_retries: u32,
    /// Last failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Not eligible for a drain before this time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<Timestamp>,
}

impl SyncQueueItem {
    /// A new pending item.
    pub fn new(
        entity_type: impl Into<EntityType>,
        entity_id: impl Into<String>,
        change: Change,
        priority: SyncPriority,
        max_retries: u32,
        now: Timestamp,
    ) -> Self {
        Self {
            id: None,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            change,
            status: SyncStatus::Pending,
            priority,
            retry_count: 0,
            max_retries,
            error: None,
            created_at: now,
            updated_at: now,
            scheduled_for: None,
        }
    }

    pub fn operation(&self) -> SyncOperation {
        self.change.operation()
    }

    /// Pending and not scheduled into the future.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.status == SyncStatus::Pending && self.scheduled_for.map_or(true, |at| at <= now)
    }

    fn transition(&mut self, allowed: &[SyncStatus], to: SyncStatus, now: Timestamp) -> Result<()> {
        if !allowed.contains(&self.status) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = self.updated_at.max(now);
        Ok(())
    }

    /// PENDING → IN_PROGRESS.
    pub fn start(&mut self, now: Timestamp) -> Result<()> {
        self.transition(&[SyncStatus::Pending], SyncStatus::InProgress, now)
    }

    /// IN_PROGRESS → COMPLETED.
    pub fn complete(&mut self, now: Timestamp) -> Result<()> {
        self.transition(&[SyncStatus::InProgress], SyncStatus::Completed, now)?;
        self.error = None;
        self.scheduled_for = None;
        Ok(())
    }

    /// IN_PROGRESS → PENDING at `scheduled_for`, without counting a failure.
    pub fn reschedule(&mut self, scheduled_for: Option<Timestamp>, now: Timestamp) -> Result<()> {
        self.transition(&[SyncStatus::InProgress], SyncStatus::Pending, now)?;
        self.scheduled_for = scheduled_for;
        Ok(())
    }

    /// Count a failed attempt: back to PENDING with backoff while retries
    /// remain, FAILED otherwise.
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        now: Timestamp,
        policy: &RetryPolicy,
    ) -> Result<FailureOutcome> {
        if self.status != SyncStatus::InProgress {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: SyncStatus::Pending,
            });
        }

        let retry_count = self.retry_count + 1;
        self.error = Some(error.into());

        if retry_count <= self.max_retries {
            let delay = policy.backoff(retry_count);
            let at = now + delay.as_millis() as Timestamp;
            self.retry_count = retry_count;
            self.reschedule(Some(at), now)?;
            Ok(FailureOutcome::Retry { delay, at })
        } else {
            self.transition(&[SyncStatus::InProgress], SyncStatus::Failed, now)?;
            self.retry_count = retry_count;
            self.scheduled_for = None;
            Ok(FailureOutcome::Exhausted)
        }
    }

    /// PENDING | IN_PROGRESS → FAILED, regardless of retries left.
    pub fn fail(&mut self, error: impl Into<String>, now: Timestamp) -> Result<()> {
        self.transition(
            &[SyncStatus::Pending, SyncStatus::InProgress],
            SyncStatus::Failed,
            now,
        )?;
        self.error = Some(error.into());
        self.scheduled_for = None;
        Ok(())
    }

    /// PENDING | IN_PROGRESS → CANCELLED.
    pub fn cancel(&mut self, now: Timestamp) -> Result<()> {
        self.transition(
            &[SyncStatus::Pending, SyncStatus::InProgress],
            SyncStatus::Cancelled,
            now,
        )?;
        self.scheduled_for = None;
        Ok(())
    }

    /// FAILED → PENDING with a fresh retry budget.
    pub fn requeue(&mut self, now: Timestamp) -> Result<()> {
        self.transition(&[SyncStatus::Failed], SyncStatus::Pending, now)?;
        self.retry_count = 0;
        self.error = None;
        self.scheduled_for = None;
        Ok(())
    }

    /// Creation order: creation time, then id.
    pub fn creation_order(a: &Self, b: &Self) -> Ordering {
        a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id))
    }

    /// Drain order: priority, then creation time, then id.
    pub fn drain_order(a: &Self, b: &Self) -> Ordering {
        a.priority
            .cmp(&b.priority)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    }
}

/// Pick at most `max_items` due items in drain order.
///
/// Items of one entity leave in creation order. An item is held back while
/// an older unfinished item of the same entity is scheduled into the future,
/// in progress, or not selected ahead of it, so a later DELETE never
/// overtakes the CREATE it follows.
pub fn select_batch(
    items: impl IntoIterator<Item = SyncQueueItem>,
    now: Timestamp,
    max_items: usize,
) -> Vec<SyncQueueItem> {
    let mut lanes: BTreeMap<(EntityType, String), VecDeque<SyncQueueItem>> = BTreeMap::new();
    for item in items.into_iter().filter(|i| !i.status.is_terminal()) {
        lanes
            .entry((item.entity_type.clone(), item.entity_id.clone()))
            .or_default()
            .push_back(item);
    }
    for lane in lanes.values_mut() {
        lane.make_contiguous().sort_by(SyncQueueItem::creation_order);
    }

    let mut batch = Vec::new();
    while batch.len() < max_items {
        let next = lanes
            .iter()
            .filter_map(|(entity, lane)| lane.front().filter(|head| head.is_due(now)).map(|head| (entity, head)))
            .min_by(|(_, a), (_, b)| SyncQueueItem::drain_order(a, b))
            .map(|(entity, _)| entity.clone());

        let Some(entity) = next else { break };
        if let Some(item) = lanes.get_mut(&entity).and_then(VecDeque::pop_front) {
            batch.push(item);
        }
    }
    batch
}

//! Durable sync queue stored in the `syncQueue` collection.
//!
//! Every state change is a read-modify-write inside one store transaction,
//! with the transition itself validated by [`SyncQueueItem`].

use std::sync::Arc;
use std::time::Duration;

use ferry_engine::{
    select_batch, Change, Clock, Error as EngineError, FailureOutcome, QueryOptions, QueueItemId,
    RecordKey, RetryPolicy, SyncPriority, SyncQueueItem, SyncStats, SyncStatus, Timestamp,
    SYNC_QUEUE_COLLECTION,
};
use serde_json::Value;

use crate::db::{LocalStore, StoreTransaction};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct SyncQueue {
    store: LocalStore,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl SyncQueue {
    pub fn new(store: LocalStore, clock: Arc<dyn Clock>, policy: RetryPolicy) -> Self {
        Self { store, clock, policy }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Append a PENDING item. Returns it with its assigned id.
    pub async fn enqueue(
        &self,
        entity_type: &str,
        entity_id: &str,
        change: Change,
        priority: SyncPriority,
    ) -> Result<SyncQueueItem> {
        let mut tx = self.store.transaction().await?;
        let item = self.enqueue_in(&mut tx, entity_type, entity_id, change, priority).await?;
        tx.commit().await?;
        Ok(item)
    }

    /// Append a PENDING item inside a caller's transaction, so the local write
    /// and its queue item commit together.
    pub async fn enqueue_in(
        &self,
        tx: &mut StoreTransaction,
        entity_type: &str,
        entity_id: &str,
        change: Change,
        priority: SyncPriority,
    ) -> Result<SyncQueueItem> {
        let item = SyncQueueItem::new(
            entity_type,
            entity_id,
            change,
            priority,
            self.policy.max_retries,
            self.clock.now(),
        );

        let stored = tx.add(SYNC_QUEUE_COLLECTION, serde_json::to_value(&item)?).await?;
        let item: SyncQueueItem = serde_json::from_value(stored)?;

        tracing::debug!(
            item_id = ?item.id,
            entity_type = %item.entity_type,
            entity_id = %item.entity_id,
            operation = %item.operation(),
            "Queued sync operation"
        );
        Ok(item)
    }

    pub async fn get(&self, id: QueueItemId) -> Result<Option<SyncQueueItem>> {
        match self.store.get(SYNC_QUEUE_COLLECTION, &RecordKey::Int(id)).await? {
            Some(document) => Ok(Some(serde_json::from_value(document)?)),
            None => Ok(None),
        }
    }

    /// Up to `max_items` due PENDING items, highest priority first, then
    /// oldest first. Items scheduled into the future are skipped, and so is
    /// every later item of an entity whose earlier item is not selected.
    pub async fn dequeue_batch(&self, max_items: usize) -> Result<Vec<SyncQueueItem>> {
        let mut open = self.with_status(SyncStatus::Pending).await?;
        open.extend(self.with_status(SyncStatus::InProgress).await?);
        Ok(select_batch(open, self.clock.now(), max_items))
    }

    pub async fn mark_in_progress(&self, id: QueueItemId) -> Result<SyncQueueItem> {
        self.modify(id, |item, now| item.start(now)).await
    }

    pub async fn mark_completed(&self, id: QueueItemId) -> Result<SyncQueueItem> {
        self.modify(id, |item, now| item.complete(now)).await
    }

    /// Fail an item outright, whatever its remaining retries.
    pub async fn mark_failed(&self, id: QueueItemId, error: &str) -> Result<SyncQueueItem> {
        self.modify(id, |item, now| item.fail(error, now)).await
    }

    /// Return an in-progress item to PENDING without counting a failure.
    pub async fn mark_pending(&self, id: QueueItemId, scheduled_for: Option<Timestamp>) -> Result<SyncQueueItem> {
        self.modify(id, |item, now| item.reschedule(scheduled_for, now)).await
    }

    /// Count a failed attempt and schedule the retry, or fail the item once
    /// its budget is spent.
    pub async fn record_failure(&self, id: QueueItemId, error: &str) -> Result<(SyncQueueItem, FailureOutcome)> {
        let mut outcome = FailureOutcome::Exhausted;
        let policy = self.policy;
        let item = self
            .modify(id, |item, now| {
                outcome = item.record_failure(error, now, &policy)?;
                Ok(())
            })
            .await?;

        match outcome {
            FailureOutcome::Retry { delay, .. } => tracing::warn!(
                item_id = id,
                retry_count = item.retry_count,
                delay_ms = delay.as_millis() as u64,
                %error,
                "Sync attempt failed, retry scheduled"
            ),
            FailureOutcome::Exhausted => tracing::error!(
                item_id = id,
                retry_count = item.retry_count,
                %error,
                "Sync attempt failed, retries exhausted"
            ),
        }
        Ok((item, outcome))
    }

    pub async fn cancel(&self, id: QueueItemId) -> Result<SyncQueueItem> {
        self.modify(id, |item, now| item.cancel(now)).await
    }

    /// Give a FAILED item a fresh retry budget.
    pub async fn requeue(&self, id: QueueItemId) -> Result<SyncQueueItem> {
        self.modify(id, |item, now| item.requeue(now)).await
    }

    /// Delete COMPLETED items last touched more than `retention` ago.
    /// Returns how many were removed.
    pub async fn sweep_completed(&self, retention: Duration) -> Result<usize> {
        let cutoff = self.clock.now().saturating_sub(retention.as_millis() as Timestamp);
        let mut tx = self.store.transaction().await?;

        let completed = tx
            .get_by_index(
                SYNC_QUEUE_COLLECTION,
                "by_status",
                &Value::from(SyncStatus::Completed.as_str()),
                &QueryOptions::default(),
            )
            .await?;

        let mut removed = 0;
        for document in completed {
            let item: SyncQueueItem = serde_json::from_value(document)?;
            if item.updated_at >= cutoff {
                continue;
            }
            if let Some(id) = item.id {
                if tx.delete(SYNC_QUEUE_COLLECTION, &RecordKey::Int(id)).await? {
                    removed += 1;
                }
            }
        }

        tx.commit().await?;
        if removed > 0 {
            tracing::info!(removed, "Swept completed sync items");
        }
        Ok(removed)
    }

    /// Item counts by status.
    pub async fn stats(&self) -> Result<SyncStats> {
        let items = self.all().await?;
        Ok(SyncStats::tally(&items))
    }

    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self.with_status(SyncStatus::Pending).await?.len())
    }

    /// Every item of one entity, oldest first.
    pub async fn items_for_entity(&self, entity_type: &str, entity_id: &str) -> Result<Vec<SyncQueueItem>> {
        let documents = self
            .store
            .get_by_index(
                SYNC_QUEUE_COLLECTION,
                "by_entity",
                &Value::from(entity_id),
                &QueryOptions::default(),
            )
            .await?;

        let mut items = documents
            .into_iter()
            .map(serde_json::from_value::<SyncQueueItem>)
            .filter(|item| item.as_ref().map_or(true, |i| i.entity_type == entity_type))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    /// Every item, in id order.
    pub async fn all(&self) -> Result<Vec<SyncQueueItem>> {
        let documents = self
            .store
            .get_all(SYNC_QUEUE_COLLECTION, &QueryOptions::default())
            .await?;
        Ok(documents
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Put items left IN_PROGRESS by an interrupted run back to PENDING.
    /// Returns how many were recovered.
    pub async fn recover_in_progress(&self) -> Result<usize> {
        let stuck = self.with_status(SyncStatus::InProgress).await?;
        let mut recovered = 0;
        for item in stuck {
            if let Some(id) = item.id {
                self.mark_pending(id, None).await?;
                recovered += 1;
            }
        }
        if recovered > 0 {
            tracing::info!(recovered, "Recovered interrupted sync items");
        }
        Ok(recovered)
    }

    async fn with_status(&self, status: SyncStatus) -> Result<Vec<SyncQueueItem>> {
        let documents = self
            .store
            .get_by_index(
                SYNC_QUEUE_COLLECTION,
                "by_status",
                &Value::from(status.as_str()),
                &QueryOptions::default(),
            )
            .await?;
        Ok(documents
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }

    async fn modify<F>(&self, id: QueueItemId, change: F) -> Result<SyncQueueItem>
    where
        F: FnOnce(&mut SyncQueueItem, Timestamp) -> ferry_engine::error::Result<()>,
    {
        let key = RecordKey::Int(id);
        let mut tx = self.store.transaction().await?;

        let document = tx
            .get(SYNC_QUEUE_COLLECTION, &key)
            .await?
            .ok_or_else(|| EngineError::RecordNotFound {
                collection: SYNC_QUEUE_COLLECTION.to_string(),
                key: key.to_string(),
            })?;

        let mut item: SyncQueueItem = serde_json::from_value(document)?;
        change(&mut item, self.clock.now())?;
        tx.update(SYNC_QUEUE_COLLECTION, serde_json::to_value(&item)?).await?;
        tx.commit().await?;

        Ok(item)
    }
}

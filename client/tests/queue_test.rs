//! Integration tests for the durable sync queue.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{clock, memory_store, T0};
use ferry_client::{Error, SyncQueue};
use ferry_engine::{
    Change, Clock, Error as EngineError, FailureOutcome, ManualClock, QueryOptions, RetryPolicy, SyncPriority,
    SyncStatus, SYNC_QUEUE_COLLECTION,
};
use serde_json::json;

async fn queue() -> (SyncQueue, Arc<ManualClock>) {
    let clock = clock();
    let store = memory_store().await;
    let queue = SyncQueue::new(store, Arc::clone(&clock) as Arc<dyn Clock>, RetryPolicy::default());
    (queue, clock)
}

fn create(id: &str) -> Change {
    Change::Create {
        document: json!({"id": id}),
    }
}

#[tokio::test]
async fn test_enqueue_creates_pending_item() {
    let (queue, _) = queue().await;

    let item = queue
        .enqueue("exercise", "ex-1", create("ex-1"), SyncPriority::High)
        .await
        .unwrap();

    assert_eq!(item.id, Some(1));
    assert_eq!(item.status, SyncStatus::Pending);
    assert_eq!(item.retry_count, 0);
    assert_eq!(item.max_retries, 3);
    assert_eq!(item.created_at, T0);

    let stored = queue.get(1).await.unwrap().unwrap();
    assert_eq!(stored, item);
}

#[tokio::test]
async fn test_no_deduplication() {
    let (queue, _) = queue().await;
    queue.enqueue("exercise", "ex-1", create("ex-1"), SyncPriority::High).await.unwrap();
    queue
        .enqueue("exercise", "ex-1", Change::Delete, SyncPriority::Medium)
        .await
        .unwrap();

    let items = queue.items_for_entity("exercise", "ex-1").await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].change, create("ex-1"));
    assert_eq!(items[1].change, Change::Delete);
}

#[tokio::test]
async fn test_dequeue_holds_entity_behind_retrying_item() {
    let (queue, clock) = queue().await;
    queue.enqueue("exercise", "ex-1", create("ex-1"), SyncPriority::High).await.unwrap();
    queue
        .enqueue("exercise", "ex-1", Change::Delete, SyncPriority::Medium)
        .await
        .unwrap();
    queue.enqueue("exercise", "ex-2", create("ex-2"), SyncPriority::Low).await.unwrap();

    queue.mark_in_progress(1).await.unwrap();
    let ids: Vec<_> = queue.dequeue_batch(10).await.unwrap().iter().filter_map(|i| i.id).collect();
    assert_eq!(ids, vec![3]);

    queue.record_failure(1, "503").await.unwrap();
    let ids: Vec<_> = queue.dequeue_batch(10).await.unwrap().iter().filter_map(|i| i.id).collect();
    assert_eq!(ids, vec![3]);

    clock.advance(Duration::from_secs(2));
    let ids: Vec<_> = queue.dequeue_batch(10).await.unwrap().iter().filter_map(|i| i.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_dequeue_batch_orders_by_priority_then_age() {
    let (queue, clock) = queue().await;

    queue.enqueue("exercise", "low", create("low"), SyncPriority::Low).await.unwrap();
    clock.advance(Duration::from_millis(1));
    queue.enqueue("exercise", "high", create("high"), SyncPriority::High).await.unwrap();
    clock.advance(Duration::from_millis(1));
    queue.enqueue("exercise", "medium", create("medium"), SyncPriority::Medium).await.unwrap();
    clock.advance(Duration::from_millis(1));
    queue.enqueue("exercise", "high-2", create("high-2"), SyncPriority::High).await.unwrap();

    let batch = queue.dequeue_batch(50).await.unwrap();
    let order: Vec<&str> = batch.iter().map(|i| i.entity_id.as_str()).collect();
    assert_eq!(order, vec!["high", "high-2", "medium", "low"]);

    let limited = queue.dequeue_batch(2).await.unwrap();
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn test_dequeue_skips_items_not_yet_due_and_not_pending() {
    let (queue, clock) = queue().await;
    queue.enqueue("exercise", "a", create("a"), SyncPriority::High).await.unwrap();
    queue.enqueue("exercise", "b", create("b"), SyncPriority::High).await.unwrap();

    queue.mark_in_progress(1).await.unwrap();
    queue.mark_pending(1, Some(T0 + 5_000)).await.unwrap();
    queue.mark_in_progress(2).await.unwrap();

    assert!(queue.dequeue_batch(10).await.unwrap().is_empty());

    clock.advance(Duration::from_secs(5));
    let batch = queue.dequeue_batch(10).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, Some(1));
}

#[tokio::test]
async fn test_state_machine_is_enforced() {
    let (queue, _) = queue().await;
    queue.enqueue("exercise", "a", create("a"), SyncPriority::High).await.unwrap();

    let err = queue.mark_completed(1).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Engine(EngineError::InvalidTransition {
            from: SyncStatus::Pending,
            to: SyncStatus::Completed
        })
    ));

    queue.mark_in_progress(1).await.unwrap();
    let done = queue.mark_completed(1).await.unwrap();
    assert_eq!(done.status, SyncStatus::Completed);

    assert!(queue.cancel(1).await.is_err());
    assert!(queue.mark_in_progress(1).await.is_err());
}

#[tokio::test]
async fn test_missing_item() {
    let (queue, _) = queue().await;
    let err = queue.mark_in_progress(42).await.unwrap_err();
    assert!(matches!(err, Error::Engine(EngineError::RecordNotFound { .. })));
    assert!(queue.get(42).await.unwrap().is_none());
}

#[tokio::test]
async fn test_record_failure_backs_off_until_exhausted() {
    let (queue, clock) = queue().await;
    queue.enqueue("exercise", "a", create("a"), SyncPriority::High).await.unwrap();

    let mut delays = Vec::new();
    for _ in 0..3 {
        queue.mark_in_progress(1).await.unwrap();
        let (item, outcome) = queue.record_failure(1, "503").await.unwrap();
        assert_eq!(item.status, SyncStatus::Pending);
        let delay = outcome.retry_in().unwrap();
        assert_eq!(item.scheduled_for, Some(clock.now() + delay.as_millis() as u64));
        delays.push(delay.as_secs());
        clock.advance(delay);
    }
    assert_eq!(delays, vec![2, 4, 8]);

    queue.mark_in_progress(1).await.unwrap();
    let (item, outcome) = queue.record_failure(1, "503").await.unwrap();
    assert_eq!(outcome, FailureOutcome::Exhausted);
    assert_eq!(item.status, SyncStatus::Failed);
    assert_eq!(item.error.as_deref(), Some("503"));
    assert!(queue.dequeue_batch(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_requeue_and_cancel() {
    let (queue, _) = queue().await;
    queue.enqueue("exercise", "a", create("a"), SyncPriority::High).await.unwrap();
    queue.enqueue("exercise", "b", create("b"), SyncPriority::High).await.unwrap();

    queue.mark_failed(1, "rejected").await.unwrap();
    let requeued = queue.requeue(1).await.unwrap();
    assert_eq!(requeued.status, SyncStatus::Pending);
    assert_eq!(requeued.retry_count, 0);
    assert_eq!(requeued.error, None);

    let cancelled = queue.cancel(2).await.unwrap();
    assert_eq!(cancelled.status, SyncStatus::Cancelled);

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.total(), 2);
    assert_eq!(queue.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_sweep_completed_respects_retention() {
    let (queue, clock) = queue().await;
    for id in ["a", "b", "c"] {
        queue.enqueue("exercise", id, create(id), SyncPriority::High).await.unwrap();
    }

    queue.mark_in_progress(1).await.unwrap();
    queue.mark_completed(1).await.unwrap();
    clock.advance(Duration::from_secs(3 * 3600));
    queue.mark_in_progress(2).await.unwrap();
    queue.mark_completed(2).await.unwrap();

    let removed = queue.sweep_completed(Duration::from_secs(3600)).await.unwrap();
    assert_eq!(removed, 1);
    assert!(queue.get(1).await.unwrap().is_none());
    assert!(queue.get(2).await.unwrap().is_some());
    assert!(queue.get(3).await.unwrap().is_some());
}

#[tokio::test]
async fn test_recover_in_progress() {
    let (queue, _) = queue().await;
    queue.enqueue("exercise", "a", create("a"), SyncPriority::High).await.unwrap();
    queue.enqueue("exercise", "b", create("b"), SyncPriority::High).await.unwrap();
    queue.mark_in_progress(1).await.unwrap();

    assert_eq!(queue.recover_in_progress().await.unwrap(), 1);
    assert_eq!(queue.dequeue_batch(10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_enqueue_in_commits_with_caller() {
    let (queue, _) = queue().await;
    let store = queue.store().clone();

    let mut tx = store.transaction().await.unwrap();
    tx.add("exercises", json!({"id": "ex-1", "name": "Squat"})).await.unwrap();
    queue
        .enqueue_in(&mut tx, "exercise", "ex-1", create("ex-1"), SyncPriority::High)
        .await
        .unwrap();
    drop(tx);

    assert_eq!(store.count(SYNC_QUEUE_COLLECTION).await.unwrap(), 0);
    assert!(store
        .get_all("exercises", &QueryOptions::default())
        .await
        .unwrap()
        .is_empty());
}

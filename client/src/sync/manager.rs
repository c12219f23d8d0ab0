//! Sync manager: drains the queue into the remote backend.
//!
//! One manager owns the single-flight drain guard, the periodic auto-sync
//! timer, the per-item retry timers, the connectivity watcher, and the event
//! bus. It is an explicit service: store, backend, clock, and network state
//! are injected, and clones share the same instance.
//!
//! Background tasks only hold weak references, so dropping the last handle
//! stops them. [`SyncManager::destroy`] stops them eagerly.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ferry_engine::{
    Change, Clock, CollectionName, EntityType, Error as EngineError, FailureOutcome, QueryOptions,
    QueueItemId, RecordKey, Resolution, SyncConflict, SyncEvent, SyncMetadata, SyncOperation,
    SyncPriority, SyncQueueItem, SyncRunState, SyncStats, SyncStatus, Timestamp,
    SYNC_QUEUE_COLLECTION,
};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::backend::{RemoteBackend, RemoteError};
use super::events::{EventBus, ListenerId};
use super::network::NetworkMonitor;
use super::queue::SyncQueue;
use super::timers::RetryTimers;
use crate::config::SyncConfig;
use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::repository::{Entity, Repository};

/// Default period of the auto-sync timer.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Shortest auto-sync period; smaller requests are raised to it.
pub const MIN_SYNC_INTERVAL: Duration = Duration::from_millis(100);

/// Error recorded on items the conflict policy left to the application.
pub const CONFLICT_ERROR: &str = "conflict";

/// Outcome of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Items selected for this drain
    pub total: usize,
    /// Items the remote accepted
    pub completed: usize,
    /// Items put back with a retry scheduled
    pub retried: usize,
    /// Items that ended FAILED
    pub failed: usize,
    /// Conflicts reported by the remote
    pub conflicts: usize,
    /// The drain stopped early on lost connectivity
    pub aborted: bool,
}

enum Flow {
    Continue,
    Abort,
}

#[derive(Default)]
struct ManagerState {
    /// Requested auto-sync period, kept while offline
    auto_sync_interval: Option<Duration>,
    auto_sync: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
    last_sync: Option<Timestamp>,
    last_error: Option<String>,
}

struct Inner {
    store: LocalStore,
    queue: SyncQueue,
    clock: Arc<dyn Clock>,
    network: NetworkMonitor,
    backend: Arc<dyn RemoteBackend>,
    config: SyncConfig,
    events: EventBus,
    timers: RetryTimers,
    entities: DashMap<EntityType, CollectionName>,
    is_syncing: AtomicBool,
    drain_scheduled: AtomicBool,
    destroyed: AtomicBool,
    state: Mutex<ManagerState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.timers.cancel_all();
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = state.auto_sync.take() {
            handle.abort();
        }
        if let Some(handle) = state.watcher.take() {
            handle.abort();
        }
    }
}

/// Resets the drain flag when a drain ends, however it ends.
struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to a sync manager. Cheap to clone.
#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("online", &self.inner.network.is_online())
            .field("syncing", &self.inner.is_syncing.load(Ordering::Relaxed))
            .field("listeners", &self.inner.events.len())
            .finish()
    }
}

impl SyncManager {
    /// Create a manager and start watching connectivity.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        store: LocalStore,
        backend: Arc<dyn RemoteBackend>,
        network: NetworkMonitor,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        let queue = SyncQueue::new(store.clone(), Arc::clone(&clock), config.retry);
        let connectivity = network.subscribe();

        let inner = Arc::new(Inner {
            store,
            queue,
            clock,
            network,
            backend,
            config,
            events: EventBus::new(),
            timers: RetryTimers::new(),
            entities: DashMap::new(),
            is_syncing: AtomicBool::new(false),
            drain_scheduled: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            state: Mutex::new(ManagerState::default()),
        });

        let watcher = spawn_connectivity_watcher(Arc::downgrade(&inner), connectivity);
        inner.state().watcher = Some(watcher);

        Self { inner }
    }

    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.inner.queue
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.inner.network
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Bind an entity type to the collection holding its local records, so
    /// completed items mark those records synced and conflicts can reach them.
    pub fn register_entity(&self, entity_type: impl Into<EntityType>, collection: impl Into<CollectionName>) -> Result<()> {
        let collection = collection.into();
        self.inner.store.schema().collection(&collection)?;
        self.inner.entities.insert(entity_type.into(), collection);
        Ok(())
    }

    /// Typed repository for `E`, wired to this manager.
    pub fn repository<E: Entity>(&self) -> Result<Repository<E>> {
        self.register_entity(E::ENTITY_TYPE, E::COLLECTION)?;
        Ok(Repository::with_manager(self.clone()))
    }

    pub fn add_event_listener(&self, listener: impl Fn(&SyncEvent) + Send + Sync + 'static) -> ListenerId {
        self.inner.events.add_listener(listener)
    }

    pub fn remove_event_listener(&self, id: &str) -> bool {
        self.inner.events.remove_listener(id)
    }

    /// Enqueue a change and schedule a drain.
    pub async fn queue_operation(
        &self,
        entity_type: &str,
        entity_id: &str,
        change: Change,
        priority: SyncPriority,
    ) -> Result<SyncQueueItem> {
        let item = self.inner.queue.enqueue(entity_type, entity_id, change, priority).await?;
        self.after_local_write().await;
        Ok(item)
    }

    /// Follow-up of a committed local write: a short-delay drain when online,
    /// then the storage quota check.
    pub(crate) async fn after_local_write(&self) {
        self.schedule_drain();
        if let Err(err) = self.check_storage_quota().await {
            tracing::warn!(error = %err, "Storage quota check failed");
        }
    }

    /// Drain the queue once, unless offline or a drain is already running.
    ///
    /// Returns `None` when no drain happened.
    pub async fn process_sync_queue(&self) -> Result<Option<DrainReport>> {
        if self.is_destroyed() || !self.inner.network.is_online() {
            return Ok(None);
        }
        let Some(_guard) = self.try_begin_drain() else {
            tracing::debug!("Sync already in progress, skipping");
            return Ok(None);
        };
        self.drain().await.map(Some)
    }

    /// Drain the queue now.
    ///
    /// Fails with [`Error::Offline`] when offline and with
    /// [`Error::SyncInProgress`] when a drain is already running.
    pub async fn force_sync(&self) -> Result<DrainReport> {
        if self.is_destroyed() {
            return Err(Error::Destroyed);
        }
        if !self.inner.network.is_online() {
            return Err(Error::Offline);
        }
        let Some(_guard) = self.try_begin_drain() else {
            return Err(Error::SyncInProgress);
        };
        self.drain().await
    }

    /// Drain every `interval` while online. Replaces a running timer.
    ///
    /// Intervals below [`MIN_SYNC_INTERVAL`] are raised to it.
    pub fn start_auto_sync(&self, interval: Duration) {
        if self.is_destroyed() {
            return;
        }
        if interval < MIN_SYNC_INTERVAL {
            tracing::warn!(
                requested_ms = interval.as_millis() as u64,
                "Auto sync interval too short, using the minimum"
            );
        }
        let interval = interval.max(MIN_SYNC_INTERVAL);
        let mut state = self.inner.state();
        state.auto_sync_interval = Some(interval);
        if self.inner.network.is_online() {
            self.arm_auto_sync(&mut state, interval);
        }
        tracing::info!(interval_secs = interval.as_secs(), "Auto sync started");
    }

    pub fn stop_auto_sync(&self) {
        let mut state = self.inner.state();
        state.auto_sync_interval = None;
        disarm_auto_sync(&mut state);
        tracing::info!("Auto sync stopped");
    }

    /// Whether the periodic timer is currently armed.
    pub fn is_auto_sync_armed(&self) -> bool {
        self.inner.state().auto_sync.is_some()
    }

    pub async fn get_sync_stats(&self) -> Result<SyncStats> {
        self.inner.queue.stats().await
    }

    pub async fn run_state(&self) -> Result<SyncRunState> {
        let pending_operations = self.inner.queue.pending_count().await?;
        let state = self.inner.state();
        Ok(SyncRunState {
            is_online: self.inner.network.is_online(),
            is_syncing: self.inner.is_syncing.load(Ordering::Acquire),
            last_sync: state.last_sync,
            pending_operations,
            last_error: state.last_error.clone(),
        })
    }

    /// Disarm the retry timer of one item. The item stays PENDING and is
    /// picked up by the next drain once due.
    pub fn cancel_retry(&self, id: QueueItemId) -> bool {
        self.inner.timers.cancel(id)
    }

    pub fn cancel_all_retries(&self) -> usize {
        self.inner.timers.cancel_all()
    }

    /// Number of armed retry timers.
    pub fn pending_retries(&self) -> usize {
        self.inner.timers.len()
    }

    /// Emit `storage_quota_warning` when usage crosses the configured
    /// threshold. Returns the usage percentage when the warning fired.
    pub async fn check_storage_quota(&self) -> Result<Option<f64>> {
        let Some(quota) = self.inner.config.storage_quota_bytes.filter(|q| *q > 0) else {
            return Ok(None);
        };

        let usage = self.inner.store.usage().await?;
        let usage_percent = usage as f64 / quota as f64 * 100.0;
        if usage_percent < self.inner.config.quota_warning_ratio * 100.0 {
            return Ok(None);
        }

        tracing::warn!(usage_bytes = usage, quota_bytes = quota, usage_percent, "Storage quota warning");
        self.inner
            .events
            .emit(&SyncEvent::StorageQuotaWarning { usage_percent });
        Ok(Some(usage_percent))
    }

    /// Stop auto sync, cancel every retry timer, stop watching connectivity,
    /// and drop all listeners. The store stays usable.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        {
            let mut state = self.inner.state();
            state.auto_sync_interval = None;
            disarm_auto_sync(&mut state);
            if let Some(watcher) = state.watcher.take() {
                watcher.abort();
            }
        }

        let cancelled = self.inner.timers.cancel_all();
        self.inner.events.clear();
        tracing::info!(cancelled_retries = cancelled, "Sync manager destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    fn try_begin_drain(&self) -> Option<SyncingGuard<'_>> {
        self.inner
            .is_syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncingGuard(&self.inner.is_syncing))
    }

    async fn drain(&self) -> Result<DrainReport> {
        let inner = &self.inner;
        let started = Instant::now();
        inner.events.emit(&SyncEvent::SyncStarted {
            timestamp: inner.clock.now(),
        });

        let batch = match inner.queue.dequeue_batch(inner.config.batch_size.max(1)).await {
            Ok(batch) => batch,
            Err(err) => {
                self.report_failure(err.to_string(), None);
                return Err(err);
            }
        };

        let mut report = DrainReport {
            total: batch.len(),
            ..DrainReport::default()
        };
        tracing::info!(items = report.total, "Sync started");

        // Entities whose earlier item did not go through this drain.
        let mut held: HashSet<(EntityType, String)> = HashSet::new();

        for item in batch {
            if !inner.network.is_online() {
                report.aborted = true;
                self.report_failure("device went offline during sync".to_string(), None);
                break;
            }
            let Some(id) = item.id else { continue };
            let entity = (item.entity_type.clone(), item.entity_id.clone());
            if held.contains(&entity) {
                tracing::debug!(item_id = id, entity_id = %item.entity_id, "Earlier change still pending, holding back");
                continue;
            }

            let item = match inner.queue.mark_in_progress(id).await {
                Ok(item) => item,
                Err(Error::Engine(EngineError::InvalidTransition { from, .. })) => {
                    tracing::debug!(item_id = id, status = %from, "Item changed since selection, skipping");
                    held.insert(entity);
                    continue;
                }
                Err(err) => {
                    self.report_failure(err.to_string(), None);
                    return Err(err);
                }
            };

            let completed = report.completed;
            let flow = self.push(&item, &mut report).await;
            if report.completed == completed {
                held.insert(entity);
            }
            match flow {
                Ok(Flow::Continue) => {}
                Ok(Flow::Abort) => {
                    report.aborted = true;
                    break;
                }
                Err(err) => {
                    self.report_failure(err.to_string(), None);
                    return Err(err);
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        {
            let mut state = inner.state();
            state.last_sync = Some(inner.clock.now());
            if !report.aborted && report.failed == 0 && report.retried == 0 {
                state.last_error = None;
            }
        }

        if !report.aborted {
            inner.events.emit(&SyncEvent::SyncCompleted {
                duration_ms,
                items_processed: report.completed,
            });
        }
        tracing::info!(
            completed = report.completed,
            retried = report.retried,
            failed = report.failed,
            conflicts = report.conflicts,
            aborted = report.aborted,
            duration_ms,
            "Sync finished"
        );

        if report.completed > 0 {
            if let Err(err) = inner.queue.sweep_completed(inner.config.completed_retention).await {
                tracing::warn!(error = %err, "Sweeping completed items failed");
            }
        }
        if let Err(err) = self.check_storage_quota().await {
            tracing::warn!(error = %err, "Storage quota check failed");
        }

        Ok(report)
    }

    /// Push one IN_PROGRESS item and settle its state.
    async fn push(&self, item: &SyncQueueItem, report: &mut DrainReport) -> Result<Flow> {
        let result = match &item.change {
            Change::Create { document } => {
                self.call_remote(self.inner.backend.create_entity(&item.entity_type, &item.entity_id, document))
                    .await
            }
            Change::Update { document } => {
                self.call_remote(self.inner.backend.update_entity(&item.entity_type, &item.entity_id, document))
                    .await
            }
            Change::Delete => {
                self.call_remote(self.inner.backend.delete_entity(&item.entity_type, &item.entity_id))
                    .await
            }
        };

        match result {
            Ok(()) => {
                self.complete(item, report).await?;
                Ok(Flow::Continue)
            }
            Err(RemoteError::Conflict { remote }) => {
                report.conflicts += 1;
                self.resolve_conflict(item, remote, report).await
            }
            Err(err) => self.fail(item, err, report).await,
        }
    }

    async fn call_remote<F>(&self, call: F) -> std::result::Result<(), RemoteError>
    where
        F: std::future::Future<Output = std::result::Result<(), RemoteError>>,
    {
        let timeout = self.inner.config.request_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(timeout)),
        }
    }

    async fn complete(&self, item: &SyncQueueItem, report: &mut DrainReport) -> Result<()> {
        let Some(id) = item.id else { return Ok(()) };
        self.inner.queue.mark_completed(id).await?;
        report.completed += 1;

        tracing::debug!(item_id = id, entity_id = %item.entity_id, operation = %item.operation(), "Sync item completed");
        self.inner.events.emit(&SyncEvent::SyncProgress {
            completed: report.completed,
            total: report.total,
        });

        if let Err(err) = self.mark_record_synced(item).await {
            tracing::warn!(item_id = id, error = %err, "Could not mark local record synced");
        }
        Ok(())
    }

    /// Record a failed attempt. Retryable failures back off and arm a retry
    /// timer; others fail the item right away.
    async fn fail(&self, item: &SyncQueueItem, error: RemoteError, report: &mut DrainReport) -> Result<Flow> {
        let Some(id) = item.id else { return Ok(Flow::Continue) };
        let message = error.to_string();

        if !error.is_retryable() {
            self.inner.queue.mark_failed(id, &message).await?;
            report.failed += 1;
            tracing::error!(item_id = id, error = %message, "Sync item rejected");
            self.report_failure(message, None);
            return Ok(Flow::Continue);
        }

        let (_, outcome) = self.inner.queue.record_failure(id, &message).await?;
        match outcome {
            FailureOutcome::Retry { delay, .. } => {
                report.retried += 1;
                self.arm_retry(id, delay);
                self.report_failure(message, Some(delay));
            }
            FailureOutcome::Exhausted => {
                report.failed += 1;
                self.report_failure(format!("max retries reached: {message}"), None);
            }
        }

        Ok(if error.is_connectivity() {
            Flow::Abort
        } else {
            Flow::Continue
        })
    }

    async fn resolve_conflict(&self, item: &SyncQueueItem, remote: Value, report: &mut DrainReport) -> Result<Flow> {
        let Some(id) = item.id else { return Ok(Flow::Continue) };
        let collection = self.collection_for(&item.entity_type);
        let now = self.inner.clock.now();

        let stored = match &collection {
            Some(collection) => {
                let key = self.record_key(collection, &item.entity_id);
                self.inner.store.get(collection, &key).await?
            }
            None => None,
        };
        let local = stored
            .clone()
            .or_else(|| item.change.document().cloned())
            .unwrap_or(Value::Null);

        let mut conflict = SyncConflict::new(&item.entity_type, &item.entity_id, local.clone(), remote.clone(), now);
        let resolution = self.inner.config.conflict_strategy.resolve(&conflict);
        conflict.resolution = Some(resolution);

        tracing::warn!(
            item_id = id,
            entity_type = %item.entity_type,
            entity_id = %item.entity_id,
            fields = ?conflict.conflict_fields,
            ?resolution,
            "Sync conflict detected"
        );
        self.inner.events.emit(&SyncEvent::ConflictDetected { conflict });

        match resolution {
            Resolution::TakeRemote => {
                if let Some(collection) = &collection {
                    self.store_remote_version(collection, &item.entity_id, stored.as_ref(), remote, now)
                        .await?;
                }
                self.complete(item, report).await?;
                Ok(Flow::Continue)
            }
            Resolution::KeepLocal if item.operation() != SyncOperation::Delete => {
                let result = self
                    .call_remote(self.inner.backend.overwrite_entity(&item.entity_type, &item.entity_id, &local))
                    .await;
                match result {
                    Ok(()) => {
                        self.complete(item, report).await?;
                        Ok(Flow::Continue)
                    }
                    Err(err) => self.fail(item, err, report).await,
                }
            }
            Resolution::KeepLocal | Resolution::Defer => {
                if let (Some(collection), Some(mut document)) = (&collection, stored) {
                    if let Some(fields) = document.as_object_mut() {
                        fields.insert("_conflictData".to_string(), remote);
                        self.inner.store.update(collection, document).await?;
                    }
                }
                self.inner.queue.mark_failed(id, CONFLICT_ERROR).await?;
                report.failed += 1;
                self.report_failure(format!("{CONFLICT_ERROR}: {}/{}", item.entity_type, item.entity_id), None);
                Ok(Flow::Continue)
            }
        }
    }

    async fn store_remote_version(
        &self,
        collection: &str,
        entity_id: &str,
        local: Option<&Value>,
        mut remote: Value,
        now: Timestamp,
    ) -> Result<()> {
        if !remote.is_object() {
            return Ok(());
        }

        let mut metadata = SyncMetadata::read(&remote)
            .ok()
            .or_else(|| local.and_then(|doc| SyncMetadata::read(doc).ok()))
            .unwrap_or_else(|| SyncMetadata::new_local(now));
        metadata.conflict_data = None;
        metadata.mark_synced(now);
        metadata.write_into(&mut remote)?;

        let def = self.inner.store.schema().collection(collection)?;
        def.assign_key(&mut remote, &self.record_key(collection, entity_id))?;
        self.inner.store.update(collection, remote).await?;
        Ok(())
    }

    /// Flag the local record as synced, unless newer changes for the same
    /// entity are still queued.
    async fn mark_record_synced(&self, item: &SyncQueueItem) -> Result<()> {
        if item.operation() == SyncOperation::Delete {
            return Ok(());
        }
        let Some(collection) = self.collection_for(&item.entity_type) else {
            return Ok(());
        };

        let mut tx = self.inner.store.transaction().await?;
        let related = tx
            .get_by_index(
                SYNC_QUEUE_COLLECTION,
                "by_entity",
                &Value::from(item.entity_id.as_str()),
                &QueryOptions::default(),
            )
            .await?;
        let superseded = related
            .into_iter()
            .filter_map(|doc| serde_json::from_value::<SyncQueueItem>(doc).ok())
            .any(|other| {
                other.id != item.id
                    && other.entity_type == item.entity_type
                    && matches!(other.status, SyncStatus::Pending | SyncStatus::InProgress)
            });
        if superseded {
            return Ok(());
        }

        let key = self.record_key(&collection, &item.entity_id);
        let Some(mut document) = tx.get(&collection, &key).await? else {
            return Ok(());
        };
        // Records written without sync metadata are left alone.
        let Ok(mut metadata) = SyncMetadata::read(&document) else {
            return Ok(());
        };

        metadata.mark_synced(self.inner.clock.now());
        metadata.write_into(&mut document)?;
        tx.update(&collection, document).await?;
        tx.commit().await?;
        Ok(())
    }

    fn collection_for(&self, entity_type: &str) -> Option<CollectionName> {
        self.inner.entities.get(entity_type).map(|c| c.value().clone())
    }

    /// Entity ids are strings; auto-increment collections key by integer.
    fn record_key(&self, collection: &str, entity_id: &str) -> RecordKey {
        let auto_increment = self
            .inner
            .store
            .schema()
            .collection(collection)
            .map(|def| def.auto_increment)
            .unwrap_or(false);
        match entity_id.parse::<i64>() {
            Ok(id) if auto_increment => RecordKey::Int(id),
            _ => RecordKey::Text(entity_id.to_string()),
        }
    }

    fn report_failure(&self, error: String, retry_in: Option<Duration>) {
        self.inner.state().last_error = Some(error.clone());
        self.inner.events.emit(&SyncEvent::SyncFailed {
            error,
            retry_in_ms: retry_in.map(|d| d.as_millis() as u64),
        });
    }

    fn arm_retry(&self, id: QueueItemId, delay: Duration) {
        if self.is_destroyed() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        self.inner.timers.arm(id, delay, async move {
            let Some(inner) = weak.upgrade() else { return };
            let manager = SyncManager { inner };
            if let Err(err) = manager.process_sync_queue().await {
                tracing::warn!(item_id = id, error = %err, "Retry sync failed");
            }
        });
    }

    /// Drain after the configured delay, coalescing bursts of writes.
    fn schedule_drain(&self) {
        if self.is_destroyed() || !self.inner.network.is_online() {
            return;
        }
        if self.inner.drain_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.config.drain_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };
            inner.drain_scheduled.store(false, Ordering::Release);
            let manager = SyncManager { inner };
            if let Err(err) = manager.process_sync_queue().await {
                tracing::warn!(error = %err, "Scheduled sync failed");
            }
        });
    }

    /// Drain in a task of its own, so aborting the caller never interrupts
    /// an in-flight remote call.
    fn spawn_drain(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(err) = manager.process_sync_queue().await {
                tracing::warn!(error = %err, "Sync failed");
            }
        });
    }

    fn arm_auto_sync(&self, state: &mut ManagerState, interval: Duration) {
        disarm_auto_sync(state);
        let weak = Arc::downgrade(&self.inner);
        state.auto_sync = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                SyncManager { inner }.spawn_drain();
            }
        }));
    }

    fn on_connectivity(&self, online: bool) {
        if self.is_destroyed() {
            return;
        }
        self.inner.events.emit(&SyncEvent::OfflineMode { enabled: !online });

        let mut state = self.inner.state();
        if online {
            if let Some(interval) = state.auto_sync_interval {
                self.arm_auto_sync(&mut state, interval);
            }
            drop(state);
            self.spawn_drain();
        } else {
            disarm_auto_sync(&mut state);
        }
    }
}

fn disarm_auto_sync(state: &mut ManagerState) {
    if let Some(handle) = state.auto_sync.take() {
        handle.abort();
    }
}

fn spawn_connectivity_watcher(inner: Weak<Inner>, mut connectivity: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while connectivity.changed().await.is_ok() {
            let online = *connectivity.borrow_and_update();
            let Some(inner) = inner.upgrade() else { break };
            SyncManager { inner }.on_connectivity(online);
        }
    })
}

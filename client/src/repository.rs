//! Typed access to one entity collection.
//!
//! A [`Repository`] stores domain values wrapped in [`StoredRecord`] and
//! queues the matching remote change in the same transaction as the local
//! write, so a committed write always has its queue item.

use std::marker::PhantomData;
use std::sync::Arc;

use ferry_engine::{
    Change, Clock, QueryOptions, RecordKey, StoredRecord, SyncPriority, SyncQueueItem,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::db::LocalStore;
use crate::error::Result;
use crate::sync::{SyncManager, SyncQueue};

/// A domain type kept in a local collection and mirrored to the remote.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Entity type name used by the remote backend
    const ENTITY_TYPE: &'static str;
    /// Local collection, keyed by `id`
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
}

/// Fresh identifier for a new entity.
pub fn new_entity_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub struct Repository<E> {
    store: LocalStore,
    queue: SyncQueue,
    clock: Arc<dyn Clock>,
    manager: Option<SyncManager>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            queue: self.queue.clone(),
            clock: Arc::clone(&self.clock),
            manager: self.manager.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> std::fmt::Debug for Repository<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &std::any::type_name::<E>())
            .field("managed", &self.manager.is_some())
            .finish()
    }
}

impl<E: Entity> Repository<E> {
    /// A repository that only queues changes. Nothing drains them until a
    /// [`SyncManager`] runs on the same store.
    pub fn new(store: LocalStore, queue: SyncQueue, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            queue,
            clock,
            manager: None,
            _entity: PhantomData,
        }
    }

    /// A repository whose writes trigger the manager's drain.
    pub(crate) fn with_manager(manager: SyncManager) -> Self {
        Self {
            store: manager.store().clone(),
            queue: manager.queue().clone(),
            clock: Arc::clone(manager.clock()),
            manager: Some(manager),
            _entity: PhantomData,
        }
    }

    /// Store a new entity and queue its creation at high priority.
    pub async fn create(&self, entity: E) -> Result<StoredRecord<E>> {
        let id = entity.id().to_string();
        let record = StoredRecord::new_local(entity, self.clock.now());

        let mut tx = self.store.transaction().await?;
        let document = tx.add(E::COLLECTION, record.to_document()?).await?;
        self.queue
            .enqueue_in(&mut tx, E::ENTITY_TYPE, &id, Change::Create { document: document.clone() }, SyncPriority::High)
            .await?;
        tx.commit().await?;

        self.after_write().await;
        Ok(StoredRecord::from_document(document)?)
    }

    /// Store a new version of an entity, keeping its creation time and sync
    /// history, and queue the update. An entity not stored yet is created.
    pub async fn update(&self, entity: E) -> Result<StoredRecord<E>> {
        self.write_version(entity, false).await
    }

    /// Delete an entity and queue the remote deletion. Returns `false`, with
    /// nothing queued, when the entity does not exist locally.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut tx = self.store.transaction().await?;
        if !tx.delete(E::COLLECTION, &key(id)).await? {
            return Ok(false);
        }
        self.queue
            .enqueue_in(&mut tx, E::ENTITY_TYPE, id, Change::Delete, SyncPriority::Medium)
            .await?;
        tx.commit().await?;

        self.after_write().await;
        Ok(true)
    }

    pub async fn get(&self, id: &str) -> Result<Option<StoredRecord<E>>> {
        match self.store.get(E::COLLECTION, &key(id)).await? {
            Some(document) => Ok(Some(StoredRecord::from_document(document)?)),
            None => Ok(None),
        }
    }

    pub async fn list(&self, options: &QueryOptions) -> Result<Vec<StoredRecord<E>>> {
        let documents = self.store.get_all(E::COLLECTION, options).await?;
        decode(documents)
    }

    pub async fn find_by_index(
        &self,
        index: &str,
        value: impl Into<Value>,
        options: &QueryOptions,
    ) -> Result<Vec<StoredRecord<E>>> {
        let documents = self
            .store
            .get_by_index(E::COLLECTION, index, &value.into(), options)
            .await?;
        decode(documents)
    }

    /// Records with local changes the remote has not confirmed.
    pub async fn pending_sync(&self) -> Result<Vec<StoredRecord<E>>> {
        self.list(&QueryOptions::new().where_eq("_needsSync", true)).await
    }

    /// Records holding a remote version that awaits manual resolution.
    pub async fn conflicted(&self) -> Result<Vec<StoredRecord<E>>> {
        let records = self.list(&QueryOptions::default()).await?;
        Ok(records
            .into_iter()
            .filter(|record| record.sync.conflict_data.is_some())
            .collect())
    }

    /// Settle a conflict with the chosen version: the parked remote copy is
    /// dropped and the chosen version is queued as an update.
    pub async fn resolve_conflict(&self, entity: E) -> Result<StoredRecord<E>> {
        self.write_version(entity, true).await
    }

    /// Queue items of one entity, oldest first.
    pub async fn sync_history(&self, id: &str) -> Result<Vec<SyncQueueItem>> {
        self.queue.items_for_entity(E::ENTITY_TYPE, id).await
    }

    async fn write_version(&self, entity: E, clear_conflict: bool) -> Result<StoredRecord<E>> {
        let id = entity.id().to_string();
        let now = self.clock.now();

        let mut tx = self.store.transaction().await?;
        let existing = tx.get(E::COLLECTION, &key(&id)).await?;
        let is_new = existing.is_none();
        let record = match existing {
            Some(existing) => {
                let mut record = StoredRecord::<E>::from_document(existing)?;
                record.revise(entity, now);
                if clear_conflict {
                    record.sync.conflict_data = None;
                }
                record
            }
            None => StoredRecord::new_local(entity, now),
        };

        let document = tx.update(E::COLLECTION, record.to_document()?).await?;
        // An entity unknown locally is queued the way `create` queues it.
        let (change, priority) = if is_new {
            (Change::Create { document: document.clone() }, SyncPriority::High)
        } else {
            (Change::Update { document: document.clone() }, SyncPriority::Medium)
        };
        self.queue
            .enqueue_in(&mut tx, E::ENTITY_TYPE, &id, change, priority)
            .await?;
        tx.commit().await?;

        self.after_write().await;
        Ok(StoredRecord::from_document(document)?)
    }

    async fn after_write(&self) {
        if let Some(manager) = &self.manager {
            manager.after_local_write().await;
        }
    }
}

fn key(id: &str) -> RecordKey {
    RecordKey::Text(id.to_string())
}

fn decode<E: Entity>(documents: Vec<Value>) -> Result<Vec<StoredRecord<E>>> {
    documents
        .into_iter()
        .map(|document| StoredRecord::from_document(document).map_err(Into::into))
        .collect()
}

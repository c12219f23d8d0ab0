//! Local document store persisted in SQLite.
//!
//! Collections, primary keys, and secondary indexes follow a
//! [`Schema`]; documents are stored as JSON. Every single-record call runs in
//! its own transaction, and [`LocalStore::transaction`] groups writes across
//! collections.

mod pool;
mod records;
mod transaction;

pub use pool::{create_pool, create_tables, file_options, memory_options, Pool};
pub use transaction::StoreTransaction;

use crate::error::{Error, Result};
use ferry_engine::{
    sync_queue_collection, QueryOptions, RecordKey, Schema, StoreSnapshot, Timestamp,
    SYNC_QUEUE_COLLECTION,
};
use serde_json::Value;
use sqlx::sqlite::SqliteConnectOptions;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Handle to an initialized store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LocalStore {
    pool: Pool,
    schema: Arc<Schema>,
}

impl LocalStore {
    /// Open (or create) a store in a database file.
    pub async fn open(path: impl AsRef<Path>, schema: Schema) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Initialization(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        Self::initialize(file_options(path), schema).await
    }

    /// Open a private in-memory store, gone once the last handle is closed.
    pub async fn in_memory(schema: Schema) -> Result<Self> {
        let options = memory_options().map_err(|e| Error::Initialization(e.to_string()))?;
        Self::initialize(options, schema).await
    }

    /// Connect with explicit options and apply the schema.
    ///
    /// The sync queue collection is always part of the store, whether the
    /// schema declares it or not.
    pub async fn initialize(options: SqliteConnectOptions, mut schema: Schema) -> Result<Self> {
        if !schema.collections.contains_key(SYNC_QUEUE_COLLECTION) {
            schema.add_collection(sync_queue_collection());
        }
        schema.validate()?;

        let pool = create_pool(options)
            .await
            .map_err(|e| Error::Initialization(e.to_string()))?;
        create_tables(&pool)
            .await
            .map_err(|e| Error::Initialization(e.to_string()))?;

        let store = Self {
            pool,
            schema: Arc::new(schema),
        };

        let mut tx = store.transaction().await?;
        tx.apply_schema().await?;
        tx.commit().await?;

        info!(
            version = store.schema.version,
            collections = store.schema.collections.len(),
            "Local store ready"
        );
        Ok(store)
    }

    /// The schema this store was opened with.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Begin a transaction.
    ///
    /// The store holds a single connection: other calls on this store wait
    /// until the transaction is committed or dropped, so never await them
    /// while a transaction is open.
    pub async fn transaction(&self) -> Result<StoreTransaction> {
        let tx = self.pool.begin().await?;
        Ok(StoreTransaction::new(tx, Arc::clone(&self.schema)))
    }

    pub async fn add(&self, collection: &str, document: Value) -> Result<Value> {
        let mut tx = self.transaction().await?;
        let stored = tx.add(collection, document).await?;
        tx.commit().await?;
        Ok(stored)
    }

    pub async fn update(&self, collection: &str, document: Value) -> Result<Value> {
        let mut tx = self.transaction().await?;
        let stored = tx.update(collection, document).await?;
        tx.commit().await?;
        Ok(stored)
    }

    pub async fn get(&self, collection: &str, key: &RecordKey) -> Result<Option<Value>> {
        let mut tx = self.transaction().await?;
        let document = tx.get(collection, key).await?;
        tx.commit().await?;
        Ok(document)
    }

    pub async fn delete(&self, collection: &str, key: &RecordKey) -> Result<bool> {
        let mut tx = self.transaction().await?;
        let existed = tx.delete(collection, key).await?;
        tx.commit().await?;
        Ok(existed)
    }

    pub async fn get_all(&self, collection: &str, options: &QueryOptions) -> Result<Vec<Value>> {
        let mut tx = self.transaction().await?;
        let documents = tx.get_all(collection, options).await?;
        tx.commit().await?;
        Ok(documents)
    }

    pub async fn get_by_index(
        &self,
        collection: &str,
        index: &str,
        value: &Value,
        options: &QueryOptions,
    ) -> Result<Vec<Value>> {
        let mut tx = self.transaction().await?;
        let documents = tx.get_by_index(collection, index, value, options).await?;
        tx.commit().await?;
        Ok(documents)
    }

    pub async fn count(&self, collection: &str) -> Result<usize> {
        let mut tx = self.transaction().await?;
        let count = tx.count(collection).await?;
        tx.commit().await?;
        Ok(count)
    }

    pub async fn clear(&self, collection: &str) -> Result<bool> {
        let mut tx = self.transaction().await?;
        let cleared = tx.clear(collection).await?;
        tx.commit().await?;
        Ok(cleared)
    }

    /// Size of the database in bytes.
    pub async fn usage(&self) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        let bytes = records::database_size(&mut conn).await?;
        Ok(bytes.max(0) as u64)
    }

    /// Copy every declared collection into a snapshot.
    pub async fn export_snapshot(&self, exported_at: Timestamp) -> Result<StoreSnapshot> {
        let mut snapshot = StoreSnapshot::new(self.schema.version, exported_at);
        let mut tx = self.transaction().await?;

        for def in self.schema.collections.values() {
            for document in tx.get_all(&def.name, &QueryOptions::default()).await? {
                let key = def.require_key(&document)?;
                snapshot.add_document(&def.name, &key, document);
            }
        }

        tx.commit().await?;
        Ok(snapshot)
    }

    /// Replace the contents of every declared collection with a snapshot.
    ///
    /// The snapshot must match the store's schema version. The whole import
    /// is one transaction: on error nothing changes.
    pub async fn import_snapshot(&self, snapshot: &StoreSnapshot) -> Result<usize> {
        snapshot.validate(&self.schema)?;
        let mut tx = self.transaction().await?;

        for name in self.schema.collections.keys() {
            tx.clear(name).await?;
        }

        let mut imported = 0;
        for name in snapshot.collections.keys() {
            for (_, document) in snapshot.documents(name)? {
                tx.add(name, document.clone()).await?;
                imported += 1;
            }
        }

        tx.commit().await?;
        info!(records = imported, "Snapshot imported");
        Ok(imported)
    }

    /// Close the underlying connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

//! Multi-collection transactions over the local store.

use super::records::{self, DocumentRow};
use crate::error::Result;
use ferry_engine::{CollectionDef, Error as EngineError, QueryOptions, RecordKey, Schema};
use serde_json::Value;
use sqlx::Sqlite;
use std::sync::Arc;
use tracing::{info, warn};

const SCHEMA_VERSION_KEY: &str = "schema_version";

/// An open read-write transaction spanning any number of collections.
///
/// Nothing is visible to other readers until [`commit`](Self::commit).
/// Dropping the transaction without committing rolls every write back.
pub struct StoreTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
    schema: Arc<Schema>,
}

impl StoreTransaction {
    pub(crate) fn new(tx: sqlx::Transaction<'static, Sqlite>, schema: Arc<Schema>) -> Self {
        Self { tx, schema }
    }

    /// Insert a new document. Auto-increment collections assign the key when
    /// the document has none. Returns the stored document.
    pub async fn add(&mut self, collection: &str, mut document: Value) -> Result<Value> {
        let schema = Arc::clone(&self.schema);
        let def = schema.collection(collection)?;
        ensure_object(&document)?;

        let key = self.resolve_key(def, &mut document).await?;
        let encoded = key.encode();

        if records::document_exists(&mut self.tx, collection, &encoded).await? {
            return Err(EngineError::DuplicateKey {
                collection: collection.to_string(),
                key: key.to_string(),
            }
            .into());
        }

        self.check_unique(def, &encoded, &document).await?;
        records::upsert_document(&mut self.tx, collection, &encoded, &serde_json::to_string(&document)?)
            .await?;
        self.write_index_entries(def, &encoded, &document).await?;

        Ok(document)
    }

    /// Insert or replace a document by key. Returns the stored document.
    pub async fn update(&mut self, collection: &str, mut document: Value) -> Result<Value> {
        let schema = Arc::clone(&self.schema);
        let def = schema.collection(collection)?;
        ensure_object(&document)?;

        let key = self.resolve_key(def, &mut document).await?;
        let encoded = key.encode();

        self.check_unique(def, &encoded, &document).await?;
        records::upsert_document(&mut self.tx, collection, &encoded, &serde_json::to_string(&document)?)
            .await?;
        self.write_index_entries(def, &encoded, &document).await?;

        Ok(document)
    }

    /// Fetch a document by key.
    pub async fn get(&mut self, collection: &str, key: &RecordKey) -> Result<Option<Value>> {
        self.schema.collection(collection)?;
        match records::fetch_document(&mut self.tx, collection, &key.encode()).await? {
            Some(doc) => Ok(Some(serde_json::from_str(&doc)?)),
            None => Ok(None),
        }
    }

    /// Delete a document by key. Returns whether it existed.
    pub async fn delete(&mut self, collection: &str, key: &RecordKey) -> Result<bool> {
        self.schema.collection(collection)?;
        let encoded = key.encode();
        records::delete_index_entries(&mut self.tx, collection, &encoded).await?;
        Ok(records::delete_document(&mut self.tx, collection, &encoded).await?)
    }

    /// All documents of a collection in key order, then filtered, sorted,
    /// and paginated by `options`.
    pub async fn get_all(&mut self, collection: &str, options: &QueryOptions) -> Result<Vec<Value>> {
        self.schema.collection(collection)?;
        let rows = records::fetch_documents(&mut self.tx, collection).await?;
        Ok(options.apply(decode_rows(rows)?))
    }

    /// Documents whose index entry equals `value`, then `options` applied.
    pub async fn get_by_index(
        &mut self,
        collection: &str,
        index: &str,
        value: &Value,
        options: &QueryOptions,
    ) -> Result<Vec<Value>> {
        let schema = Arc::clone(&self.schema);
        let def = schema.collection(collection)?;
        let index = def.index(index)?;

        let rows = records::fetch_documents_by_index(
            &mut self.tx,
            collection,
            &index.name,
            &ferry_engine::schema::encode_index_value(value),
        )
        .await?;
        Ok(options.apply(decode_rows(rows)?))
    }

    /// Number of documents in a collection.
    pub async fn count(&mut self, collection: &str) -> Result<usize> {
        self.schema.collection(collection)?;
        let count = records::count_documents(&mut self.tx, collection).await?;
        Ok(count.max(0) as usize)
    }

    /// Remove every document of a collection.
    pub async fn clear(&mut self, collection: &str) -> Result<bool> {
        self.schema.collection(collection)?;
        records::clear_collection(&mut self.tx, collection).await?;
        Ok(true)
    }

    /// Make every write of this transaction durable.
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    /// Discard every write of this transaction.
    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    /// Bring the persisted collections in line with the schema.
    ///
    /// A new store or a changed version recreates every collection and drops
    /// the stored documents. With the same version, new collections are added
    /// and collections whose definition changed get their indexes rebuilt.
    pub(crate) async fn apply_schema(&mut self) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let persisted = records::read_meta(&mut self.tx, SCHEMA_VERSION_KEY)
            .await?
            .and_then(|v| v.parse::<u32>().ok());

        match persisted {
            Some(version) if version == schema.version => {
                for def in schema.collections.values() {
                    let definition = serde_json::to_string(def)?;
                    match records::collection_definition(&mut self.tx, &def.name).await? {
                        Some(stored) if stored == definition => {}
                        Some(_) => {
                            info!(collection = %def.name, "Collection definition changed, rebuilding indexes");
                            records::upsert_collection(&mut self.tx, &def.name, &definition).await?;
                            self.rebuild_indexes(def).await?;
                        }
                        None => {
                            info!(collection = %def.name, "Creating collection");
                            records::upsert_collection(&mut self.tx, &def.name, &definition).await?;
                        }
                    }
                }
            }
            previous => {
                if let Some(previous) = previous {
                    warn!(
                        from = previous,
                        to = schema.version,
                        "Schema version changed, recreating collections and dropping stored data"
                    );
                } else {
                    info!(version = schema.version, "Creating local store");
                }

                records::drop_all(&mut self.tx).await?;
                for def in schema.collections.values() {
                    records::upsert_collection(&mut self.tx, &def.name, &serde_json::to_string(def)?)
                        .await?;
                }
            }
        }

        records::write_meta(&mut self.tx, SCHEMA_VERSION_KEY, &schema.version.to_string()).await?;
        Ok(())
    }

    async fn rebuild_indexes(&mut self, def: &CollectionDef) -> Result<()> {
        records::delete_collection_index_entries(&mut self.tx, &def.name).await?;
        let rows = records::fetch_documents(&mut self.tx, &def.name).await?;
        for row in rows {
            let document: Value = serde_json::from_str(&row.doc)?;
            for (index, value) in def.index_entries(&document) {
                records::insert_index_entry(&mut self.tx, &def.name, &index.name, &value, &row.key)
                    .await?;
            }
        }
        Ok(())
    }

    async fn resolve_key(&mut self, def: &CollectionDef, document: &mut Value) -> Result<RecordKey> {
        match def.key_of(document)? {
            Some(key) => {
                if def.auto_increment {
                    if let Some(explicit) = key.as_i64() {
                        let next = records::next_key(&mut self.tx, &def.name).await?;
                        if explicit >= next {
                            records::set_next_key(&mut self.tx, &def.name, explicit + 1).await?;
                        }
                    }
                }
                Ok(key)
            }
            None if def.auto_increment => {
                let next = records::next_key(&mut self.tx, &def.name).await?;
                let key = RecordKey::Int(next);
                def.assign_key(document, &key)?;
                records::set_next_key(&mut self.tx, &def.name, next + 1).await?;
                Ok(key)
            }
            None => Ok(def.require_key(document)?),
        }
    }

    async fn check_unique(&mut self, def: &CollectionDef, key: &str, document: &Value) -> Result<()> {
        for (index, value) in def.index_entries(document) {
            if !index.unique {
                continue;
            }
            if records::index_owner(&mut self.tx, &def.name, &index.name, &value, key)
                .await?
                .is_some()
            {
                return Err(EngineError::UniqueViolation {
                    collection: def.name.clone(),
                    index: index.name.clone(),
                    value,
                }
                .into());
            }
        }
        Ok(())
    }

    async fn write_index_entries(&mut self, def: &CollectionDef, key: &str, document: &Value) -> Result<()> {
        records::delete_index_entries(&mut self.tx, &def.name, key).await?;
        for (index, value) in def.index_entries(document) {
            records::insert_index_entry(&mut self.tx, &def.name, &index.name, &value, key).await?;
        }
        Ok(())
    }
}

fn ensure_object(document: &Value) -> Result<()> {
    if document.is_object() {
        Ok(())
    } else {
        Err(EngineError::InvalidPayload("document must be an object".into()).into())
    }
}

/// Decode rows into documents ordered by record key.
pub(crate) fn decode_rows(rows: Vec<DocumentRow>) -> Result<Vec<Value>> {
    let mut keyed = rows
        .into_iter()
        .map(|row| {
            let key = RecordKey::decode(&row.key)?;
            let doc: Value = serde_json::from_str(&row.doc)?;
            Ok((key, doc))
        })
        .collect::<Result<Vec<_>>>()?;
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(keyed.into_iter().map(|(_, doc)| doc).collect())
}

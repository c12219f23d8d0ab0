//! Snapshot types for exporting and importing store contents.
//!
//! A snapshot is a plain JSON image of every collection, keyed by the
//! canonical key encoding. BTreeMaps keep serialization deterministic.

use crate::{error::Result, CollectionName, Error, RecordKey, Schema, SchemaVersion, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time image of the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Schema version at time of export
    pub schema_version: SchemaVersion,
    /// Export time (milliseconds since epoch)
    pub exported_at: Timestamp,
    /// Documents by collection, then by encoded key
    pub collections: BTreeMap<CollectionName, BTreeMap<String, Value>>,
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new(schema_version: SchemaVersion, exported_at: Timestamp) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            schema_version,
            exported_at,
            collections: BTreeMap::new(),
        }
    }

    /// Add a document under its key.
    pub fn add_document(&mut self, collection: &str, key: &RecordKey, document: Value) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(key.encode(), document);
    }

    /// Get a document from the snapshot.
    pub fn get_document(&self, collection: &str, key: &RecordKey) -> Option<&Value> {
        self.collections.get(collection)?.get(&key.encode())
    }

    /// Documents of one collection with decoded keys.
    pub fn documents(&self, collection: &str) -> Result<Vec<(RecordKey, &Value)>> {
        let Some(docs) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };
        docs.iter()
            .map(|(key, doc)| Ok((RecordKey::decode(key)?, doc)))
            .collect()
    }

    /// Count total documents across all collections.
    pub fn record_count(&self) -> usize {
        self.collections.values().map(|c| c.len()).sum()
    }

    /// Validate the snapshot against a schema.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        if self.schema_version != schema.version {
            return Err(Error::SchemaVersionMismatch {
                expected: schema.version,
                actual: self.schema_version,
            });
        }

        for (collection_name, documents) in &self.collections {
            let def = schema.collection(collection_name)?;
            for (encoded, document) in documents {
                let key = RecordKey::decode(encoded)?;
                if def.require_key(document)? != key {
                    return Err(Error::InvalidSnapshot(format!(
                        "document stored under {encoded} in '{collection_name}' carries a different key"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Metadata about a snapshot (without the full data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub schema_version: SchemaVersion,
    pub exported_at: Timestamp,
    /// Document count per collection
    pub counts: BTreeMap<CollectionName, usize>,
}

impl From<&StoreSnapshot> for SnapshotMetadata {
    fn from(snapshot: &StoreSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            schema_version: snapshot.schema_version,
            exported_at: snapshot.exported_at,
            counts: snapshot
                .collections
                .iter()
                .map(|(name, docs)| (name.clone(), docs.len()))
                .collect(),
        }
    }
}

//! Schema definition: collections, primary keys, and secondary indexes.
//!
//! A schema is versioned as a single integer. Opening a store at a version
//! different from the persisted one recreates every declared collection.

use crate::{error::Result, CollectionName, Error, RecordKey, SchemaVersion};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Resolve a dot-separated path (`a.b.c`) inside a JSON document.
pub fn value_at<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |current, segment| current.get(segment))
}

/// Set a dot-separated path, creating intermediate objects as needed.
pub fn set_value_at(document: &mut Value, path: &str, value: Value) -> Result<()> {
    let mut segments = path.split('.').peekable();
    let mut current = document;

    while let Some(segment) = segments.next() {
        let object = current
            .as_object_mut()
            .ok_or_else(|| Error::InvalidPayload(format!("cannot set '{path}' on a non-object")))?;

        if segments.peek().is_none() {
            object.insert(segment.to_string(), value);
            return Ok(());
        }

        current = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }

    Err(Error::InvalidPayload("empty key path".into()))
}

/// Canonical encoding of an indexed value.
pub fn encode_index_value(value: &Value) -> String {
    value.to_string()
}

/// Definition of a secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDef {
    /// Index name, unique within its collection
    pub name: String,
    /// Dot path of the indexed field
    pub key_path: String,
    /// Whether two records may share an indexed value
    pub unique: bool,
}

impl IndexDef {
    /// A non-unique index.
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            unique: false,
        }
    }

    /// A unique index.
    pub fn unique(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            unique: true,
            ..Self::new(name, key_path)
        }
    }

    /// Encoded index entry for a document. Records with a missing or null
    /// value at the key path are not indexed.
    pub fn entry_for(&self, document: &Value) -> Option<String> {
        match value_at(document, &self.key_path) {
            None | Some(Value::Null) => None,
            Some(value) => Some(encode_index_value(value)),
        }
    }
}

/// Definition of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDef {
    /// Collection name
    pub name: CollectionName,
    /// Dot path of the primary key
    pub key_path: String,
    /// Assign integer keys to records that arrive without one
    pub auto_increment: bool,
    /// Secondary indexes
    pub indexes: Vec<IndexDef>,
}

impl CollectionDef {
    /// Create a collection keyed by `key_path`.
    pub fn new(name: impl Into<CollectionName>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            auto_increment: false,
            indexes: Vec::new(),
        }
    }

    /// Builder-style auto-increment switch.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Builder-style method to add an index.
    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    /// Look up an index by name.
    pub fn index(&self, name: &str) -> Result<&IndexDef> {
        self.indexes
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| Error::IndexNotFound {
                collection: self.name.clone(),
                index: name.to_string(),
            })
    }

    /// Extract the primary key, if present.
    pub fn key_of(&self, document: &Value) -> Result<Option<RecordKey>> {
        match value_at(document, &self.key_path) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => RecordKey::from_value(value).map(Some).ok_or_else(|| {
                Error::InvalidKey(format!(
                    "'{}' in '{}' must be an integer or a string, got {value}",
                    self.key_path, self.name
                ))
            }),
        }
    }

    /// Extract the primary key, failing when absent.
    pub fn require_key(&self, document: &Value) -> Result<RecordKey> {
        self.key_of(document)?.ok_or_else(|| Error::MissingKey {
            collection: self.name.clone(),
            key_path: self.key_path.clone(),
        })
    }

    /// Write a key into a document (auto-increment assignment).
    pub fn assign_key(&self, document: &mut Value, key: &RecordKey) -> Result<()> {
        set_value_at(document, &self.key_path, key.to_value())
    }

    /// All index entries a document contributes, as `(index, encoded value)`.
    pub fn index_entries<'a>(&'a self, document: &Value) -> Vec<(&'a IndexDef, String)> {
        self.indexes
            .iter()
            .filter_map(|index| index.entry_for(document).map(|entry| (index, entry)))
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidSchema("collection name is empty".into()));
        }
        if self.key_path.is_empty() || self.key_path.split('.').any(str::is_empty) {
            return Err(Error::InvalidSchema(format!(
                "collection '{}' has an invalid key path '{}'",
                self.name, self.key_path
            )));
        }

        let mut seen = HashSet::new();
        for index in &self.indexes {
            if index.key_path.is_empty() {
                return Err(Error::InvalidSchema(format!(
                    "index '{}' on '{}' has an empty key path",
                    index.name, self.name
                )));
            }
            if !seen.insert(index.name.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate index '{}' on '{}'",
                    index.name, self.name
                )));
            }
        }

        Ok(())
    }
}

/// Schema for the entire store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Schema version; a change recreates every declared collection
    pub version: SchemaVersion,
    /// Collection definitions by name
    pub collections: BTreeMap<CollectionName, CollectionDef>,
}

impl Schema {
    /// Create a new schema.
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            collections: BTreeMap::new(),
        }
    }

    /// Add a collection to the schema.
    pub fn add_collection(&mut self, collection: CollectionDef) -> &mut Self {
        self.collections.insert(collection.name.clone(), collection);
        self
    }

    /// Builder-style method to add a collection.
    pub fn with_collection(mut self, collection: CollectionDef) -> Self {
        self.add_collection(collection);
        self
    }

    /// Get a collection definition by name.
    pub fn collection(&self, name: &str) -> Result<&CollectionDef> {
        self.collections
            .get(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    /// Check every collection definition.
    pub fn validate(&self) -> Result<()> {
        self.collections.values().try_for_each(CollectionDef::validate)
    }
}

//! Record types for storing data.

use crate::{error::Result, Error, Timestamp};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Primary key of a stored record.
///
/// Keys are either integers (auto-increment collections) or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordKey {
    Int(i64),
    Text(String),
}

impl RecordKey {
    /// Interpret a JSON value as a key.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RecordKey::Int),
            Value::String(s) => Some(RecordKey::Text(s.clone())),
            _ => None,
        }
    }

    /// The key as a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            RecordKey::Int(i) => Value::from(*i),
            RecordKey::Text(s) => Value::from(s.as_str()),
        }
    }

    /// Integer value, if this is an integer key.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RecordKey::Int(i) => Some(*i),
            RecordKey::Text(_) => None,
        }
    }

    /// Canonical storage encoding. Integer and string keys never collide.
    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }

    /// Inverse of [`RecordKey::encode`].
    pub fn decode(encoded: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(encoded)
            .map_err(|e| Error::InvalidKey(format!("{encoded}: {e}")))?;
        Self::from_value(&value).ok_or_else(|| Error::InvalidKey(encoded.to_string()))
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Int(i) => write!(f, "{i}"),
            RecordKey::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordKey {
    fn from(value: i64) -> Self {
        RecordKey::Int(value)
    }
}

impl From<&str> for RecordKey {
    fn from(value: &str) -> Self {
        RecordKey::Text(value.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(value: String) -> Self {
        RecordKey::Text(value)
    }
}

impl From<&String> for RecordKey {
    fn from(value: &String) -> Self {
        RecordKey::Text(value.clone())
    }
}

/// Synchronization metadata stored next to every domain payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    /// Local changes not yet confirmed by the remote
    #[serde(rename = "_needsSync", default)]
    pub needs_sync: bool,
    /// Record has never reached the remote
    #[serde(rename = "_isLocalOnly", default)]
    pub is_local_only: bool,
    /// Last successful sync
    #[serde(
        rename = "_lastSyncAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_sync_at: Option<Timestamp>,
    /// Remote version kept aside when a conflict awaits manual resolution
    #[serde(
        rename = "_conflictData",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub conflict_data: Option<Value>,
    /// When the record was first stored (milliseconds since epoch)
    pub created_at: Timestamp,
    /// When the record was last stored (milliseconds since epoch)
    pub updated_at: Timestamp,
}

/// Document fields owned by [`SyncMetadata`].
pub const METADATA_FIELDS: [&str; 6] = [
    "_needsSync",
    "_isLocalOnly",
    "_lastSyncAt",
    "_conflictData",
    "createdAt",
    "updatedAt",
];

impl SyncMetadata {
    /// Metadata for a record created locally and never synced.
    pub fn new_local(now: Timestamp) -> Self {
        Self {
            needs_sync: true,
            is_local_only: true,
            last_sync_at: None,
            conflict_data: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a local modification. `updated_at` never moves backwards.
    pub fn touch(&mut self, now: Timestamp) {
        self.needs_sync = true;
        self.updated_at = self.updated_at.max(now);
    }

    /// Record a confirmed sync.
    pub fn mark_synced(&mut self, now: Timestamp) {
        self.needs_sync = false;
        self.is_local_only = false;
        self.last_sync_at = Some(now);
    }

    /// Read the metadata subset out of a stored document.
    pub fn read(document: &Value) -> Result<Self> {
        let object = document
            .as_object()
            .ok_or_else(|| Error::InvalidPayload("document must be an object".into()))?;
        let subset: Map<String, Value> = METADATA_FIELDS
            .iter()
            .filter_map(|field| object.get(*field).map(|v| (field.to_string(), v.clone())))
            .collect();
        serde_json::from_value(Value::Object(subset))
            .map_err(|e| Error::InvalidPayload(e.to_string()))
    }

    /// Overwrite the metadata subset of a stored document, leaving payload
    /// fields untouched.
    pub fn write_into(&self, document: &mut Value) -> Result<()> {
        let object = document
            .as_object_mut()
            .ok_or_else(|| Error::InvalidPayload("document must be an object".into()))?;
        for field in METADATA_FIELDS {
            object.remove(field);
        }
        if let Value::Object(fields) =
            serde_json::to_value(self).map_err(|e| Error::InvalidPayload(e.to_string()))?
        {
            object.extend(fields);
        }
        Ok(())
    }
}

/// A domain payload plus its synchronization metadata.
///
/// Serialized flat: the payload's fields and the metadata fields share one
/// JSON object, so indexes and filters address payload fields directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord<T> {
    /// The domain payload
    #[serde(flatten)]
    pub data: T,
    /// Sync bookkeeping
    #[serde(flatten)]
    pub sync: SyncMetadata,
}

impl<T> StoredRecord<T> {
    /// Wrap a freshly created local payload.
    pub fn new_local(data: T, now: Timestamp) -> Self {
        Self {
            data,
            sync: SyncMetadata::new_local(now),
        }
    }

    /// Replace the payload, keeping `created_at` and sync history.
    pub fn revise(&mut self, data: T, now: Timestamp) {
        self.data = data;
        self.sync.touch(now);
    }

    /// Whether local changes still wait for the remote.
    pub fn needs_sync(&self) -> bool {
        self.sync.needs_sync
    }
}

impl<T: Serialize> StoredRecord<T> {
    /// Serialize into a store document.
    pub fn to_document(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| Error::InvalidPayload(e.to_string()))
    }
}

impl<T: DeserializeOwned> StoredRecord<T> {
    /// Parse a store document.
    pub fn from_document(document: Value) -> Result<Self> {
        serde_json::from_value(document).map_err(|e| Error::InvalidPayload(e.to_string()))
    }
}

//! Conflict detection and resolution between a local record and the
//! version the remote holds.
//!
//! A conflict is raised when the remote rejects a pushed change because its
//! own copy diverged. The configured [`ConflictStrategy`] decides who wins;
//! [`ConflictStrategy::Manual`] parks the remote copy on the local record
//! until the application decides.

use crate::{record::METADATA_FIELDS, schema::value_at, EntityType, Error, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::str::FromStr;

/// How conflicts are settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConflictStrategy {
    /// Local version is pushed over the remote one
    #[serde(rename = "local")]
    LocalWins,
    /// Remote version replaces the local record
    #[serde(rename = "remote")]
    RemoteWins,
    /// Newer `updatedAt` wins; ties go to the remote
    #[serde(rename = "timestamp")]
    LastWriteWins,
    /// Keep both and wait for the application (default)
    #[default]
    #[serde(rename = "manual")]
    Manual,
}

impl FromStr for ConflictStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ConflictStrategy::LocalWins),
            "remote" => Ok(ConflictStrategy::RemoteWins),
            "timestamp" => Ok(ConflictStrategy::LastWriteWins),
            "manual" => Ok(ConflictStrategy::Manual),
            other => Err(Error::InvalidPayload(format!(
                "unknown conflict strategy '{other}'"
            ))),
        }
    }
}

/// Outcome of applying a strategy to a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    /// Push the local version again
    KeepLocal,
    /// Store the remote version locally
    TakeRemote,
    /// Leave it to the application
    Defer,
}

/// A detected divergence between local and remote versions of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    pub entity_type: EntityType,
    pub entity_id: String,
    /// Local document, metadata included
    pub local_data: Value,
    /// Remote document as returned by the backend
    pub remote_data: Value,
    /// Top-level payload fields that differ
    pub conflict_fields: Vec<String>,
    /// Set once a strategy has been applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    pub timestamp: Timestamp,
}

impl SyncConflict {
    pub fn new(
        entity_type: impl Into<EntityType>,
        entity_id: impl Into<String>,
        local_data: Value,
        remote_data: Value,
        timestamp: Timestamp,
    ) -> Self {
        let conflict_fields = diff_fields(&local_data, &remote_data);
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            local_data,
            remote_data,
            conflict_fields,
            resolution: None,
            timestamp,
        }
    }

    /// Whether the two versions differ in payload at all.
    pub fn has_differences(&self) -> bool {
        !self.conflict_fields.is_empty()
    }
}

impl ConflictStrategy {
    /// Decide a conflict. Deterministic for a given pair of documents.
    pub fn resolve(&self, conflict: &SyncConflict) -> Resolution {
        match self {
            ConflictStrategy::LocalWins => Resolution::KeepLocal,
            ConflictStrategy::RemoteWins => Resolution::TakeRemote,
            ConflictStrategy::Manual => Resolution::Defer,
            ConflictStrategy::LastWriteWins => {
                let local = updated_at(&conflict.local_data);
                let remote = updated_at(&conflict.remote_data);
                match (local, remote) {
                    (Some(local), Some(remote)) if local > remote => Resolution::KeepLocal,
                    (Some(_), None) => Resolution::KeepLocal,
                    _ => Resolution::TakeRemote,
                }
            }
        }
    }
}

fn updated_at(document: &Value) -> Option<u64> {
    value_at(document, "updatedAt").and_then(Value::as_u64)
}

/// Sorted top-level keys whose values differ, ignoring sync metadata.
pub fn diff_fields(local: &Value, remote: &Value) -> Vec<String> {
    let (Some(local), Some(remote)) = (local.as_object(), remote.as_object()) else {
        return if local == remote {
            Vec::new()
        } else {
            vec![String::new()]
        };
    };

    local
        .keys()
        .chain(remote.keys())
        .filter(|key| !METADATA_FIELDS.contains(&key.as_str()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|key| local.get(*key) != remote.get(*key))
        .cloned()
        .collect()
}

//! Error types for the Ferry engine.

use crate::{CollectionName, SchemaVersion, SyncStatus};
use thiserror::Error;

/// All possible errors from the Ferry engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Schema errors
    #[error("collection not found: {0}")]
    CollectionNotFound(CollectionName),

    #[error("index '{index}' not found on collection '{collection}'")]
    IndexNotFound {
        collection: CollectionName,
        index: String,
    },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    // Constraint errors
    #[error("record in '{collection}' has no key at '{key_path}'")]
    MissingKey {
        collection: CollectionName,
        key_path: String,
    },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("duplicate key {key} in collection '{collection}'")]
    DuplicateKey {
        collection: CollectionName,
        key: String,
    },

    #[error("unique index '{index}' on '{collection}' already holds {value}")]
    UniqueViolation {
        collection: CollectionName,
        index: String,
        value: String,
    },

    #[error("record {key} not found in '{collection}'")]
    RecordNotFound {
        collection: CollectionName,
        key: String,
    },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    // Queue errors
    #[error("invalid queue transition: {from} -> {to}")]
    InvalidTransition { from: SyncStatus, to: SyncStatus },

    // Snapshot errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch {
        expected: SchemaVersion,
        actual: SchemaVersion,
    },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

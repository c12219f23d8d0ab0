//! Remote backend abstraction.
//!
//! The sync manager pushes queue items through a [`RemoteBackend`]. The
//! error type classifies failures so the manager can tell a retryable
//! outage from a rejected payload or a conflict.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// Failure of a remote call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    /// The remote could not be reached at all
    #[error("remote unreachable: {0}")]
    Unreachable(String),

    #[error("remote call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Transient server-side failure (5xx, 408, 429)
    #[error("remote error {status}: {message}")]
    Server { status: u16, message: String },

    /// The remote refused the payload; retrying will not help
    #[error("remote rejected the change ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The remote holds a diverged version of the entity
    #[error("remote holds a conflicting version")]
    Conflict { remote: Value },

    #[error("{message}")]
    Other { message: String, retryable: bool },
}

impl RemoteError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Unreachable(_) | RemoteError::Timeout(_) | RemoteError::Server { .. } => true,
            RemoteError::Rejected { .. } | RemoteError::Conflict { .. } => false,
            RemoteError::Other { retryable, .. } => *retryable,
        }
    }

    /// Whether the failure means the device lost the remote, which ends the
    /// current drain.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, RemoteError::Unreachable(_))
    }
}

/// Remote system the queue drains into.
///
/// Entity payloads are the documents captured at enqueue time, sync metadata
/// included.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    async fn create_entity(&self, entity_type: &str, id: &str, document: &Value) -> Result<(), RemoteError>;

    async fn update_entity(&self, entity_type: &str, id: &str, document: &Value) -> Result<(), RemoteError>;

    /// Deleting an entity the remote does not know is a success.
    async fn delete_entity(&self, entity_type: &str, id: &str) -> Result<(), RemoteError>;

    /// Push a local version over a conflicting remote one.
    async fn overwrite_entity(&self, entity_type: &str, id: &str, document: &Value) -> Result<(), RemoteError> {
        self.update_entity(entity_type, id, document).await
    }
}

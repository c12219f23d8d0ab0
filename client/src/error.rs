//! Unified error handling for the client runtime.

use crate::config::ConfigError;
use crate::sync::RemoteError;

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to initialize local store: {0}")]
    Initialization(String),

    #[error("Store transaction failed: {0}")]
    Transaction(#[from] sqlx::Error),

    #[error(transparent)]
    Engine(#[from] ferry_engine::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Device is offline")]
    Offline,

    #[error("A sync is already in progress")]
    SyncInProgress,

    #[error("Sync manager has been destroyed")]
    Destroyed,

    #[error("Remote call failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Constraint violations reported by the engine (duplicate key, unknown
    /// record, invalid queue transition, ...). These are never retried.
    pub fn is_constraint(&self) -> bool {
        matches!(self, Error::Engine(_))
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_engine::SyncStatus;

    #[test]
    fn engine_errors_are_transparent() {
        let err: Error = ferry_engine::Error::InvalidTransition {
            from: SyncStatus::Completed,
            to: SyncStatus::InProgress,
        }
        .into();
        assert_eq!(err.to_string(), "invalid queue transition: completed -> in_progress");
        assert!(err.is_constraint());
        assert!(!Error::Offline.is_constraint());
    }
}

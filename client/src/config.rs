//! Configuration management for the client runtime.
//!
//! [`Config`] is what the `ferry` daemon reads from the environment;
//! [`SyncConfig`] holds the knobs the [`SyncManager`](crate::sync::SyncManager)
//! runs with and can be built directly by embedding applications.

use ferry_engine::{CollectionName, ConflictStrategy, EntityType, RetryPolicy, SchemaVersion};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings of the sync manager.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Queue items fetched per drain
    pub batch_size: usize,
    /// Retry budget and backoff
    pub retry: RetryPolicy,
    /// Upper bound for a single remote call
    pub request_timeout: Duration,
    /// How long completed queue items are kept
    pub completed_retention: Duration,
    /// Delay between an enqueue and the drain it triggers, coalescing bursts
    pub drain_delay: Duration,
    /// How conflicts reported by the remote are settled
    pub conflict_strategy: ConflictStrategy,
    /// Local storage budget; `None` disables the quota warning
    pub storage_quota_bytes: Option<u64>,
    /// Fraction of the budget that triggers the warning
    pub quota_warning_ratio: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(30),
            completed_retention: Duration::from_secs(24 * 60 * 60),
            drain_delay: Duration::from_millis(100),
            conflict_strategy: ConflictStrategy::default(),
            storage_quota_bytes: None,
            quota_warning_ratio: 0.8,
        }
    }
}

/// Daemon configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file
    pub database_path: PathBuf,
    /// Local schema version; a change recreates every collection
    pub schema_version: SchemaVersion,
    /// JSON file with the collection definitions to open
    pub collections_file: Option<PathBuf>,
    /// Entity type to collection bindings (`exercise:exercises,...`)
    pub entities: Vec<(EntityType, CollectionName)>,
    /// Base URL of the remote backend
    pub remote_url: String,
    /// Bearer token sent to the remote
    pub auth_token: Option<String>,
    pub sync_interval_minutes: u64,
    pub batch_size: usize,
    pub max_retries: u32,
    pub request_timeout_secs: u64,
    pub retention_hours: u64,
    pub conflict_strategy: ConflictStrategy,
    pub storage_quota_mb: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_path = lookup("FERRY_DATABASE_PATH")
            .unwrap_or_else(|| "ferry.db".to_string())
            .into();

        let remote_url = lookup("FERRY_REMOTE_URL").ok_or(ConfigError::MissingRemoteUrl)?;

        let entities = match lookup("FERRY_ENTITIES") {
            Some(raw) => parse_entities(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            database_path,
            schema_version: parse_or(&lookup, "FERRY_SCHEMA_VERSION", 1)?,
            collections_file: lookup("FERRY_COLLECTIONS_FILE").map(PathBuf::from),
            entities,
            remote_url,
            auth_token: lookup("FERRY_AUTH_TOKEN").filter(|t| !t.is_empty()),
            sync_interval_minutes: parse_positive(&lookup, "FERRY_SYNC_INTERVAL_MINUTES", 5)?,
            batch_size: parse_positive(&lookup, "FERRY_BATCH_SIZE", 50)?,
            max_retries: parse_or(&lookup, "FERRY_MAX_RETRIES", 3)?,
            request_timeout_secs: parse_positive(&lookup, "FERRY_REQUEST_TIMEOUT_SECS", 30)?,
            retention_hours: parse_or(&lookup, "FERRY_RETENTION_HOURS", 24)?,
            conflict_strategy: parse_or(&lookup, "FERRY_CONFLICT_STRATEGY", ConflictStrategy::Manual)?,
            storage_quota_mb: parse_optional(&lookup, "FERRY_STORAGE_QUOTA_MB")?,
        })
    }

    /// Interval of the periodic drain.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_minutes * 60)
    }

    /// Sync manager settings derived from this configuration.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            batch_size: self.batch_size,
            retry: RetryPolicy {
                max_retries: self.max_retries,
                ..RetryPolicy::default()
            },
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            completed_retention: Duration::from_secs(self.retention_hours * 60 * 60),
            conflict_strategy: self.conflict_strategy,
            storage_quota_bytes: self.storage_quota_mb.map(|mb| mb * 1024 * 1024),
            ..SyncConfig::default()
        }
    }
}

fn parse_optional<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    Ok(parse_optional(lookup, name)?.unwrap_or(default))
}

/// Like [`parse_or`], but zero is rejected.
fn parse_positive<T: FromStr + Default + PartialEq + ToString>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    let value = parse_or(lookup, name, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        });
    }
    Ok(value)
}

fn parse_entities(raw: &str) -> Result<Vec<(EntityType, CollectionName)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once(':') {
            Some((entity, collection)) if !entity.is_empty() && !collection.is_empty() => {
                Ok((entity.trim().to_string(), collection.trim().to_string()))
            }
            _ => Err(ConfigError::Invalid {
                name: "FERRY_ENTITIES",
                value: pair.to_string(),
            }),
        })
        .collect()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("FERRY_REMOTE_URL environment variable is required")]
    MissingRemoteUrl,

    #[error("Invalid {name} value: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("Failed to read collections file: {0}")]
    CollectionsFile(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[("FERRY_REMOTE_URL", "http://localhost:3000")]).unwrap();
        assert_eq!(config.database_path, PathBuf::from("ferry.db"));
        assert_eq!(config.schema_version, 1);
        assert_eq!(config.sync_interval(), Duration::from_secs(300));
        assert_eq!(config.conflict_strategy, ConflictStrategy::Manual);
        assert!(config.entities.is_empty());

        let sync = config.sync_config();
        assert_eq!(sync.batch_size, 50);
        assert_eq!(sync.retry.max_retries, 3);
        assert_eq!(sync.request_timeout, Duration::from_secs(30));
        assert_eq!(sync.completed_retention, Duration::from_secs(86_400));
        assert_eq!(sync.storage_quota_bytes, None);
    }

    #[test]
    fn remote_url_is_required() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingRemoteUrl)));
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("FERRY_REMOTE_URL", "https://api.example.com"),
            ("FERRY_DATABASE_PATH", "/tmp/app.db"),
            ("FERRY_BATCH_SIZE", "10"),
            ("FERRY_MAX_RETRIES", "5"),
            ("FERRY_CONFLICT_STRATEGY", "timestamp"),
            ("FERRY_STORAGE_QUOTA_MB", "50"),
            ("FERRY_ENTITIES", "exercise:exercises, workoutRecord:workoutRecords"),
            ("FERRY_AUTH_TOKEN", "secret"),
        ])
        .unwrap();

        assert_eq!(config.batch_size, 10);
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(
            config.entities,
            vec![
                ("exercise".to_string(), "exercises".to_string()),
                ("workoutRecord".to_string(), "workoutRecords".to_string()),
            ]
        );

        let sync = config.sync_config();
        assert_eq!(sync.retry.max_retries, 5);
        assert_eq!(sync.conflict_strategy, ConflictStrategy::LastWriteWins);
        assert_eq!(sync.storage_quota_bytes, Some(50 * 1024 * 1024));
    }

    #[test]
    fn invalid_values() {
        let err = load(&[
            ("FERRY_REMOTE_URL", "http://x"),
            ("FERRY_BATCH_SIZE", "many"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "FERRY_BATCH_SIZE", .. }));

        let err = load(&[
            ("FERRY_REMOTE_URL", "http://x"),
            ("FERRY_ENTITIES", "exercise"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "FERRY_ENTITIES", .. }));

        let err = load(&[
            ("FERRY_REMOTE_URL", "http://x"),
            ("FERRY_CONFLICT_STRATEGY", "merge"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn zero_values_rejected() {
        for name in [
            "FERRY_SYNC_INTERVAL_MINUTES",
            "FERRY_BATCH_SIZE",
            "FERRY_REQUEST_TIMEOUT_SECS",
        ] {
            let err = load(&[("FERRY_REMOTE_URL", "http://x"), (name, "0")]).unwrap_err();
            assert!(
                matches!(&err, ConfigError::Invalid { name: n, value } if *n == name && value == "0"),
                "{name}: {err:?}"
            );
        }
    }
}

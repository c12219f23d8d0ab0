//! Ferry daemon - drains the local sync queue into a remote backend.
//!
//! Opens the local store described by the environment, resumes items an
//! earlier run left in flight, and keeps syncing until interrupted.

use std::path::Path;
use std::sync::Arc;

use ferry_client::config::{Config, ConfigError};
use ferry_client::{HttpBackend, LocalStore, NetworkMonitor, SyncEvent, SyncManager, SystemClock};
use ferry_engine::{CollectionDef, Schema};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_client=debug,ferry=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        database = %config.database_path.display(),
        remote = %config.remote_url,
        "Starting Ferry"
    );

    // Open the local store
    let schema = load_schema(&config)?;
    let store = LocalStore::open(&config.database_path, schema).await?;

    let sync_config = config.sync_config();
    let queue = ferry_client::SyncQueue::new(store.clone(), Arc::new(SystemClock), sync_config.retry);
    queue.recover_in_progress().await?;

    // Build the remote backend and the manager
    let mut backend = HttpBackend::new(&config.remote_url, sync_config.request_timeout)?;
    if let Some(token) = &config.auth_token {
        backend = backend.with_auth_token(token);
    }

    let manager = SyncManager::new(
        store.clone(),
        Arc::new(backend),
        NetworkMonitor::new(true),
        Arc::new(SystemClock),
        sync_config,
    );
    for (entity_type, collection) in &config.entities {
        manager.register_entity(entity_type, collection)?;
    }

    manager.add_event_listener(log_event);

    let stats = manager.get_sync_stats().await?;
    tracing::info!(pending = stats.pending, failed = stats.failed, "Queue loaded");

    manager.start_auto_sync(config.sync_interval());
    if let Err(err) = manager.process_sync_queue().await {
        tracing::warn!(error = %err, "Initial sync failed");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    manager.destroy();
    store.close().await;

    Ok(())
}

/// Schema from the collections file, if configured.
fn load_schema(config: &Config) -> Result<Schema, ConfigError> {
    let mut schema = Schema::new(config.schema_version);
    if let Some(path) = &config.collections_file {
        for collection in read_collections(path)? {
            schema.add_collection(collection);
        }
    }
    Ok(schema)
}

fn read_collections(path: &Path) -> Result<Vec<CollectionDef>, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::CollectionsFile(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|e| ConfigError::CollectionsFile(format!("{}: {e}", path.display())))
}

fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::SyncStarted { .. } => tracing::debug!("Sync started"),
        SyncEvent::SyncProgress { completed, total } => {
            tracing::debug!(completed, total, "Sync progress")
        }
        SyncEvent::SyncCompleted {
            duration_ms,
            items_processed,
        } => tracing::info!(duration_ms, items_processed, "Sync completed"),
        SyncEvent::SyncFailed { error, retry_in_ms } => {
            tracing::warn!(%error, retry_in_ms, "Sync failed")
        }
        SyncEvent::ConflictDetected { conflict } => tracing::warn!(
            entity_type = %conflict.entity_type,
            entity_id = %conflict.entity_id,
            fields = ?conflict.conflict_fields,
            "Conflict detected"
        ),
        SyncEvent::OfflineMode { enabled } => tracing::info!(offline = enabled, "Offline mode"),
        SyncEvent::StorageQuotaWarning { usage_percent } => {
            tracing::warn!(usage_percent, "Storage quota warning")
        }
    }
}

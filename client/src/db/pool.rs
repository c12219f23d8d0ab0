//! Database connection pool management.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Type alias for the database pool.
pub type Pool = SqlitePool;

const TABLES: [&str; 5] = [
    r#"
    CREATE TABLE IF NOT EXISTS ferry_meta (
        key TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ferry_collections (
        name TEXT PRIMARY KEY NOT NULL,
        definition TEXT NOT NULL,
        next_key INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ferry_documents (
        collection TEXT NOT NULL,
        key TEXT NOT NULL,
        doc TEXT NOT NULL,
        PRIMARY KEY (collection, key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ferry_index_entries (
        collection TEXT NOT NULL,
        index_name TEXT NOT NULL,
        value TEXT NOT NULL,
        key TEXT NOT NULL,
        PRIMARY KEY (collection, index_name, key)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS ferry_index_lookup
        ON ferry_index_entries (collection, index_name, value)
    "#,
];

/// Connection options for an on-disk database.
pub fn file_options(path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
}

/// Connection options for a private in-memory database.
pub fn memory_options() -> Result<SqliteConnectOptions, sqlx::Error> {
    SqliteConnectOptions::from_str("sqlite::memory:")
}

/// Create a new database connection pool.
///
/// SQLite has a single writer, so the pool holds exactly one connection and
/// transactions queue behind each other. The connection never expires, which
/// also keeps in-memory databases alive.
pub async fn create_pool(options: SqliteConnectOptions) -> Result<Pool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
}

/// Create the storage tables if they do not exist yet.
pub async fn create_tables(pool: &Pool) -> Result<(), sqlx::Error> {
    for statement in TABLES {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

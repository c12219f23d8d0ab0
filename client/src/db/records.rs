//! SQL access to documents, index entries, and collection bookkeeping.
//!
//! Keys and index values arrive here already encoded; documents are JSON
//! text. Everything runs on a borrowed connection so callers decide the
//! transaction boundary.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

/// A stored document row.
#[derive(Debug)]
pub struct DocumentRow {
    /// Encoded record key
    pub key: String,
    /// Document as JSON text
    pub doc: String,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for DocumentRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(DocumentRow {
            key: row.try_get("key")?,
            doc: row.try_get("doc")?,
        })
    }
}

/// Read a store-level metadata value.
pub async fn read_meta(conn: &mut SqliteConnection, key: &str) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT value FROM ferry_meta WHERE key = ?")
        .bind(key)
        .fetch_optional(conn)
        .await
}

/// Write a store-level metadata value.
pub async fn write_meta(conn: &mut SqliteConnection, key: &str, value: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO ferry_meta (key, value) VALUES (?, ?)
        ON CONFLICT (key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(conn)
    .await?;

    Ok(())
}

/// Persisted definition of a collection, as JSON.
pub async fn collection_definition(
    conn: &mut SqliteConnection,
    name: &str,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT definition FROM ferry_collections WHERE name = ?")
        .bind(name)
        .fetch_optional(conn)
        .await
}

/// Insert or replace a collection definition, keeping its key counter.
pub async fn upsert_collection(
    conn: &mut SqliteConnection,
    name: &str,
    definition: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO ferry_collections (name, definition) VALUES (?, ?)
        ON CONFLICT (name) DO UPDATE SET definition = excluded.definition
        "#,
    )
    .bind(name)
    .bind(definition)
    .execute(conn)
    .await?;

    Ok(())
}

/// Next auto-increment key of a collection.
pub async fn next_key(conn: &mut SqliteConnection, name: &str) -> Result<i64, sqlx::Error> {
    let next: Option<i64> =
        sqlx::query_scalar("SELECT next_key FROM ferry_collections WHERE name = ?")
            .bind(name)
            .fetch_optional(conn)
            .await?;
    Ok(next.unwrap_or(1))
}

/// Move the auto-increment counter of a collection.
pub async fn set_next_key(conn: &mut SqliteConnection, name: &str, next: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE ferry_collections SET next_key = ? WHERE name = ?")
        .bind(next)
        .bind(name)
        .execute(conn)
        .await?;

    Ok(())
}

/// Remove every collection, document, and index entry.
pub async fn drop_all(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    for table in ["ferry_index_entries", "ferry_documents", "ferry_collections"] {
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Fetch one document.
pub async fn fetch_document(
    conn: &mut SqliteConnection,
    collection: &str,
    key: &str,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT doc FROM ferry_documents WHERE collection = ? AND key = ?")
        .bind(collection)
        .bind(key)
        .fetch_optional(conn)
        .await
}

/// Fetch every document of a collection.
pub async fn fetch_documents(
    conn: &mut SqliteConnection,
    collection: &str,
) -> Result<Vec<DocumentRow>, sqlx::Error> {
    sqlx::query_as("SELECT key, doc FROM ferry_documents WHERE collection = ?")
        .bind(collection)
        .fetch_all(conn)
        .await
}

/// Fetch the documents whose index entry equals `value`.
pub async fn fetch_documents_by_index(
    conn: &mut SqliteConnection,
    collection: &str,
    index: &str,
    value: &str,
) -> Result<Vec<DocumentRow>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT d.key, d.doc
        FROM ferry_index_entries i
        JOIN ferry_documents d ON d.collection = i.collection AND d.key = i.key
        WHERE i.collection = ? AND i.index_name = ? AND i.value = ?
        "#,
    )
    .bind(collection)
    .bind(index)
    .bind(value)
    .fetch_all(conn)
    .await
}

/// Whether a key is taken.
pub async fn document_exists(
    conn: &mut SqliteConnection,
    collection: &str,
    key: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM ferry_documents WHERE collection = ? AND key = ?)",
    )
    .bind(collection)
    .bind(key)
    .fetch_one(conn)
    .await
}

/// Insert or replace a document.
pub async fn upsert_document(
    conn: &mut SqliteConnection,
    collection: &str,
    key: &str,
    doc: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO ferry_documents (collection, key, doc) VALUES (?, ?, ?)
        ON CONFLICT (collection, key) DO UPDATE SET doc = excluded.doc
        "#,
    )
    .bind(collection)
    .bind(key)
    .bind(doc)
    .execute(conn)
    .await?;

    Ok(())
}

/// Delete a document. Returns whether a row was removed.
pub async fn delete_document(
    conn: &mut SqliteConnection,
    collection: &str,
    key: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM ferry_documents WHERE collection = ? AND key = ?")
        .bind(collection)
        .bind(key)
        .execute(conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Count the documents of a collection.
pub async fn count_documents(conn: &mut SqliteConnection, collection: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM ferry_documents WHERE collection = ?")
        .bind(collection)
        .fetch_one(conn)
        .await
}

/// Delete every document and index entry of a collection.
pub async fn clear_collection(conn: &mut SqliteConnection, collection: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM ferry_index_entries WHERE collection = ?")
        .bind(collection)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM ferry_documents WHERE collection = ?")
        .bind(collection)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Key of another document holding `value` in an index, if any.
pub async fn index_owner(
    conn: &mut SqliteConnection,
    collection: &str,
    index: &str,
    value: &str,
    except_key: &str,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT key FROM ferry_index_entries
        WHERE collection = ? AND index_name = ? AND value = ? AND key <> ?
        LIMIT 1
        "#,
    )
    .bind(collection)
    .bind(index)
    .bind(value)
    .bind(except_key)
    .fetch_optional(conn)
    .await
}

/// Add an index entry.
pub async fn insert_index_entry(
    conn: &mut SqliteConnection,
    collection: &str,
    index: &str,
    value: &str,
    key: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO ferry_index_entries (collection, index_name, value, key) VALUES (?, ?, ?, ?)",
    )
    .bind(collection)
    .bind(index)
    .bind(value)
    .bind(key)
    .execute(conn)
    .await?;

    Ok(())
}

/// Remove every index entry of one document.
pub async fn delete_index_entries(
    conn: &mut SqliteConnection,
    collection: &str,
    key: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM ferry_index_entries WHERE collection = ? AND key = ?")
        .bind(collection)
        .bind(key)
        .execute(conn)
        .await?;

    Ok(())
}

/// Remove every index entry of a collection.
pub async fn delete_collection_index_entries(
    conn: &mut SqliteConnection,
    collection: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM ferry_index_entries WHERE collection = ?")
        .bind(collection)
        .execute(conn)
        .await?;

    Ok(())
}

/// Approximate size of the database file in bytes.
pub async fn database_size(conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
        .fetch_one(&mut *conn)
        .await?;
    let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
        .fetch_one(&mut *conn)
        .await?;
    Ok(page_count * page_size)
}

//! Integration tests for the SQLite local store.

mod common;

use common::{memory_store, test_schema};
use ferry_client::{Error, LocalStore};
use ferry_engine::{
    CollectionDef, Direction, Error as EngineError, FilterOp, IndexDef, QueryOptions, RecordKey, Schema,
    StoreSnapshot, SYNC_QUEUE_COLLECTION,
};
use serde_json::json;

fn text(key: &str) -> RecordKey {
    RecordKey::Text(key.to_string())
}

mod crud_tests {
    use super::*;

    #[tokio::test]
    async fn test_add_then_get_returns_document() {
        let store = memory_store().await;
        let doc = json!({"id": "ex-1", "name": "Squat", "category": "legs"});

        store.add("exercises", doc.clone()).await.unwrap();

        let fetched = store.get("exercises", &text("ex-1")).await.unwrap();
        assert_eq!(fetched, Some(doc));
        assert_eq!(store.get("exercises", &text("ex-2")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_add_duplicate_key_fails() {
        let store = memory_store().await;
        store
            .add("exercises", json!({"id": "ex-1", "name": "Squat"}))
            .await
            .unwrap();

        let err = store
            .add("exercises", json!({"id": "ex-1", "name": "Deadlift"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Engine(EngineError::DuplicateKey { .. })));
        assert!(err.is_constraint());
    }

    #[tokio::test]
    async fn test_add_without_key_fails() {
        let store = memory_store().await;
        let err = store.add("exercises", json!({"name": "Squat"})).await.unwrap_err();
        assert!(matches!(err, Error::Engine(EngineError::MissingKey { .. })));
    }

    #[tokio::test]
    async fn test_add_non_object_fails() {
        let store = memory_store().await;
        let err = store.add("exercises", json!([1, 2])).await.unwrap_err();
        assert!(matches!(err, Error::Engine(EngineError::InvalidPayload(_))));
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let store = memory_store().await;
        let err = store.get("nope", &text("x")).await.unwrap_err();
        assert!(matches!(err, Error::Engine(EngineError::CollectionNotFound(_))));
    }

    #[tokio::test]
    async fn test_update_upserts() {
        let store = memory_store().await;
        store
            .update("exercises", json!({"id": "ex-1", "name": "Squat"}))
            .await
            .unwrap();
        store
            .update("exercises", json!({"id": "ex-1", "name": "Front squat"}))
            .await
            .unwrap();

        let fetched = store.get("exercises", &text("ex-1")).await.unwrap().unwrap();
        assert_eq!(fetched["name"], "Front squat");
        assert_eq!(store.count("exercises").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let store = memory_store().await;
        for i in 0..3 {
            store
                .add("exercises", json!({"id": format!("ex-{i}"), "name": format!("E{i}")}))
                .await
                .unwrap();
        }

        assert!(store.delete("exercises", &text("ex-0")).await.unwrap());
        assert!(!store.delete("exercises", &text("ex-0")).await.unwrap());
        assert_eq!(store.count("exercises").await.unwrap(), 2);

        assert!(store.clear("exercises").await.unwrap());
        assert_eq!(store.count("exercises").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_auto_increment_keys() {
        let store = memory_store().await;

        let first = store
            .add("workoutRecords", json!({"exerciseId": "ex-1", "weight": 100}))
            .await
            .unwrap();
        let second = store
            .add("workoutRecords", json!({"exerciseId": "ex-1", "weight": 105}))
            .await
            .unwrap();
        assert_eq!(first["id"], 1);
        assert_eq!(second["id"], 2);

        // An explicit key moves the counter past it.
        store
            .add("workoutRecords", json!({"id": 10, "exerciseId": "ex-2"}))
            .await
            .unwrap();
        let next = store
            .add("workoutRecords", json!({"exerciseId": "ex-2"}))
            .await
            .unwrap();
        assert_eq!(next["id"], 11);

        let fetched = store.get("workoutRecords", &RecordKey::Int(2)).await.unwrap().unwrap();
        assert_eq!(fetched["weight"], 105);
    }
}

mod query_tests {
    use super::*;

    async fn seeded() -> LocalStore {
        let store = memory_store().await;
        let rows = [
            ("ex-3", "Bench", "chest"),
            ("ex-1", "Squat", "legs"),
            ("ex-2", "Lunge", "legs"),
            ("ex-4", "Fly", "chest"),
        ];
        for (id, name, category) in rows {
            store
                .add("exercises", json!({"id": id, "name": name, "category": category}))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_get_all_is_key_ordered() {
        let store = seeded().await;
        let all = store.get_all("exercises", &QueryOptions::default()).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|d| d["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["ex-1", "ex-2", "ex-3", "ex-4"]);
    }

    #[tokio::test]
    async fn test_get_all_with_options() {
        let store = seeded().await;
        let options = QueryOptions::new()
            .where_eq("category", "legs")
            .order_by("name", Direction::Asc);
        let legs = store.get_all("exercises", &options).await.unwrap();
        let names: Vec<&str> = legs.iter().map(|d| d["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Lunge", "Squat"]);

        let page = store
            .get_all(
                "exercises",
                &QueryOptions::new().order_by("name", Direction::Desc).offset(1).limit(2),
            )
            .await
            .unwrap();
        let names: Vec<&str> = page.iter().map(|d| d["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Lunge", "Fly"]);
    }

    #[tokio::test]
    async fn test_get_by_index() {
        let store = seeded().await;
        let chest = store
            .get_by_index("exercises", "by_category", &json!("chest"), &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(chest.len(), 2);

        let filtered = store
            .get_by_index(
                "exercises",
                "by_category",
                &json!("chest"),
                &QueryOptions::new().filter("name", FilterOp::In(vec![json!("Fly")])),
            )
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0]["id"], "ex-4");

        let err = store
            .get_by_index("exercises", "by_missing", &json!("x"), &QueryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Engine(EngineError::IndexNotFound { .. })));
    }

    #[tokio::test]
    async fn test_index_follows_updates_and_deletes() {
        let store = seeded().await;
        store
            .update("exercises", json!({"id": "ex-3", "name": "Bench", "category": "arms"}))
            .await
            .unwrap();
        store.delete("exercises", &text("ex-4")).await.unwrap();

        let chest = store
            .get_by_index("exercises", "by_category", &json!("chest"), &QueryOptions::default())
            .await
            .unwrap();
        assert!(chest.is_empty());

        let arms = store
            .get_by_index("exercises", "by_category", &json!("arms"), &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(arms.len(), 1);
    }

    #[tokio::test]
    async fn test_unique_index_is_enforced() {
        let store = seeded().await;
        let err = store
            .add("exercises", json!({"id": "ex-9", "name": "Squat"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Engine(EngineError::UniqueViolation { .. })));

        // Rewriting a record with its own value is fine.
        store
            .update("exercises", json!({"id": "ex-1", "name": "Squat", "category": "glutes"}))
            .await
            .unwrap();
    }
}

mod transaction_tests {
    use super::*;

    #[tokio::test]
    async fn test_commit_spans_collections() {
        let store = memory_store().await;
        let mut tx = store.transaction().await.unwrap();
        tx.add("exercises", json!({"id": "ex-1", "name": "Squat"})).await.unwrap();
        tx.add("workoutRecords", json!({"exerciseId": "ex-1"})).await.unwrap();
        assert_eq!(tx.count("exercises").await.unwrap(), 1);
        tx.commit().await.unwrap();

        assert_eq!(store.count("exercises").await.unwrap(), 1);
        assert_eq!(store.count("workoutRecords").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rollback_and_drop_discard_writes() {
        let store = memory_store().await;

        let mut tx = store.transaction().await.unwrap();
        tx.add("exercises", json!({"id": "ex-1", "name": "Squat"})).await.unwrap();
        tx.rollback().await.unwrap();

        {
            let mut tx = store.transaction().await.unwrap();
            tx.add("exercises", json!({"id": "ex-2", "name": "Lunge"})).await.unwrap();
        }

        assert_eq!(store.count("exercises").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_step_leaves_nothing_behind() {
        let store = memory_store().await;
        store
            .add("exercises", json!({"id": "ex-1", "name": "Squat"}))
            .await
            .unwrap();

        let mut tx = store.transaction().await.unwrap();
        tx.add("workoutRecords", json!({"exerciseId": "ex-1"})).await.unwrap();
        let err = tx.add("exercises", json!({"id": "ex-1", "name": "Again"})).await;
        assert!(err.is_err());
        drop(tx);

        assert_eq!(store.count("workoutRecords").await.unwrap(), 0);
    }
}

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_sync_queue_collection_always_exists() {
        let store = LocalStore::in_memory(Schema::new(1)).await.unwrap();
        assert!(store.schema().collection(SYNC_QUEUE_COLLECTION).is_ok());
        assert_eq!(store.count(SYNC_QUEUE_COLLECTION).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_schema_is_rejected() {
        let schema = Schema::new(1).with_collection(CollectionDef::new("bad", ""));
        let err = LocalStore::in_memory(schema).await.unwrap_err();
        assert!(matches!(err, Error::Engine(EngineError::InvalidSchema(_))));
    }

    #[tokio::test]
    async fn test_unusable_path_fails_initialization() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain-file");
        std::fs::write(&file, b"not a directory").unwrap();

        let err = LocalStore::open(file.join("ferry.db"), test_schema(1)).await.unwrap_err();
        assert!(matches!(err, Error::Initialization(_)), "{err:?}");

        let err = LocalStore::open(dir.path(), test_schema(1)).await.unwrap_err();
        assert!(matches!(err, Error::Initialization(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_reopen_keeps_data_with_same_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ferry.db");

        let store = LocalStore::open(&path, test_schema(1)).await.unwrap();
        store
            .add("exercises", json!({"id": "ex-1", "name": "Squat", "category": "legs"}))
            .await
            .unwrap();
        store.close().await;

        let store = LocalStore::open(&path, test_schema(1)).await.unwrap();
        assert_eq!(store.count("exercises").await.unwrap(), 1);
        assert!(store.usage().await.unwrap() > 0);
        store.close().await;
    }

    #[tokio::test]
    async fn test_version_change_recreates_collections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferry.db");

        let store = LocalStore::open(&path, test_schema(1)).await.unwrap();
        store
            .add("exercises", json!({"id": "ex-1", "name": "Squat"}))
            .await
            .unwrap();
        store.close().await;

        let store = LocalStore::open(&path, test_schema(2)).await.unwrap();
        assert_eq!(store.count("exercises").await.unwrap(), 0);
        store.close().await;
    }

    #[tokio::test]
    async fn test_new_index_is_built_for_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferry.db");

        let schema = Schema::new(1).with_collection(CollectionDef::new("notes", "id"));
        let store = LocalStore::open(&path, schema).await.unwrap();
        store
            .add("notes", json!({"id": "n-1", "tag": "work"}))
            .await
            .unwrap();
        store.close().await;

        let schema = Schema::new(1)
            .with_collection(CollectionDef::new("notes", "id").with_index(IndexDef::new("by_tag", "tag")));
        let store = LocalStore::open(&path, schema).await.unwrap();
        let work = store
            .get_by_index("notes", "by_tag", &json!("work"), &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(work.len(), 1);
        store.close().await;
    }
}

mod snapshot_tests {
    use super::*;

    #[tokio::test]
    async fn test_export_then_import_restores_contents() {
        let source = memory_store().await;
        source
            .add("exercises", json!({"id": "ex-1", "name": "Squat", "category": "legs"}))
            .await
            .unwrap();
        source
            .add("workoutRecords", json!({"exerciseId": "ex-1", "weight": 100}))
            .await
            .unwrap();

        let snapshot = source.export_snapshot(1_000).await.unwrap();
        assert_eq!(snapshot.record_count(), 2);
        let json = snapshot.to_json().unwrap();

        let target = memory_store().await;
        target
            .add("exercises", json!({"id": "stale", "name": "Old"}))
            .await
            .unwrap();

        let imported = target
            .import_snapshot(&StoreSnapshot::from_json(&json).unwrap())
            .await
            .unwrap();
        assert_eq!(imported, 2);
        assert!(target.get("exercises", &text("stale")).await.unwrap().is_none());
        assert!(target.get("exercises", &text("ex-1")).await.unwrap().is_some());

        let by_exercise = target
            .get_by_index("workoutRecords", "by_exercise", &json!("ex-1"), &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(by_exercise.len(), 1);
    }

    #[tokio::test]
    async fn test_import_rejects_other_schema_version() {
        let store = memory_store().await;
        let snapshot = StoreSnapshot::new(7, 0);
        let err = store.import_snapshot(&snapshot).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Engine(EngineError::SchemaVersionMismatch { expected: 1, actual: 7 })
        ));
    }
}

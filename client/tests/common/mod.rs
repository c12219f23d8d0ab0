//! Shared fixtures for the client integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ferry_client::{Entity, LocalStore, NetworkMonitor, RemoteBackend, RemoteError, SyncConfig, SyncManager};
use ferry_engine::{CollectionDef, IndexDef, ManualClock, Schema, SyncEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;

/// Start of every test clock: 2024-02-01T00:00:00Z.
pub const T0: u64 = 1_706_745_600_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exercise {
    pub id: String,
    pub name: String,
    pub category: String,
}

impl Exercise {
    pub fn new(id: &str, name: &str, category: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            category: category.to_string(),
        }
    }
}

impl Entity for Exercise {
    const ENTITY_TYPE: &'static str = "exercise";
    const COLLECTION: &'static str = "exercises";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Collections used across tests.
pub fn test_schema(version: u32) -> Schema {
    Schema::new(version)
        .with_collection(
            CollectionDef::new("exercises", "id")
                .with_index(IndexDef::new("by_category", "category"))
                .with_index(IndexDef::unique("by_name", "name")),
        )
        .with_collection(
            CollectionDef::new("workoutRecords", "id")
                .auto_increment()
                .with_index(IndexDef::new("by_exercise", "exerciseId")),
        )
}

pub async fn memory_store() -> LocalStore {
    LocalStore::in_memory(test_schema(1)).await.unwrap()
}

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(T0))
}

/// Settings that keep tests fast and deterministic.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        drain_delay: Duration::from_millis(10),
        request_timeout: Duration::from_secs(5),
        ..SyncConfig::default()
    }
}

pub fn manager(
    store: &LocalStore,
    backend: &Arc<ScriptedBackend>,
    online: bool,
    clock: &Arc<ManualClock>,
    config: SyncConfig,
) -> SyncManager {
    SyncManager::new(
        store.clone(),
        Arc::clone(backend) as Arc<dyn RemoteBackend>,
        NetworkMonitor::new(online),
        Arc::clone(clock) as Arc<dyn ferry_engine::Clock>,
        config,
    )
}

/// One call received by the fake backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub op: &'static str,
    pub entity_type: String,
    pub id: String,
    pub document: Option<Value>,
}

/// Lets a test hold the backend inside a call.
#[derive(Debug, Default)]
pub struct Gate {
    pub entered: Notify,
    pub resume: Notify,
}

/// Deterministic backend: records every call and answers from a script,
/// succeeding once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    calls: Mutex<Vec<Call>>,
    script: Mutex<VecDeque<Result<(), RemoteError>>>,
    gate: Mutex<Option<Arc<Gate>>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue answers for the next calls.
    pub fn script(&self, results: impl IntoIterator<Item = Result<(), RemoteError>>) {
        self.script.lock().unwrap().extend(results);
    }

    /// Hold every following call until the gate is resumed.
    pub fn pause(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn unpause(&self) {
        *self.gate.lock().unwrap() = None;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_ids(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.id).collect()
    }

    async fn answer(&self, op: &'static str, entity_type: &str, id: &str, document: Option<&Value>) -> Result<(), RemoteError> {
        self.calls.lock().unwrap().push(Call {
            op,
            entity_type: entity_type.to_string(),
            id: id.to_string(),
            document: document.cloned(),
        });

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.resume.notified().await;
        }

        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

#[async_trait]
impl RemoteBackend for ScriptedBackend {
    async fn create_entity(&self, entity_type: &str, id: &str, document: &Value) -> Result<(), RemoteError> {
        self.answer("create", entity_type, id, Some(document)).await
    }

    async fn update_entity(&self, entity_type: &str, id: &str, document: &Value) -> Result<(), RemoteError> {
        self.answer("update", entity_type, id, Some(document)).await
    }

    async fn delete_entity(&self, entity_type: &str, id: &str) -> Result<(), RemoteError> {
        self.answer("delete", entity_type, id, None).await
    }

    async fn overwrite_entity(&self, entity_type: &str, id: &str, document: &Value) -> Result<(), RemoteError> {
        self.answer("overwrite", entity_type, id, Some(document)).await
    }
}

/// Record every event the manager emits.
pub fn collect_events(manager: &SyncManager) -> Arc<Mutex<Vec<SyncEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    manager.add_event_listener(move |event| sink.lock().unwrap().push(event.clone()));
    events
}

pub fn kinds(events: &Arc<Mutex<Vec<SyncEvent>>>) -> Vec<&'static str> {
    events.lock().unwrap().iter().map(SyncEvent::kind).collect()
}

pub fn unreachable() -> RemoteError {
    RemoteError::Unreachable("connection refused".into())
}

pub fn server_error() -> RemoteError {
    RemoteError::Server {
        status: 503,
        message: "unavailable".into(),
    }
}

/// Poll until `check` holds, for at most two seconds.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

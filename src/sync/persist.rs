//! Persisted cache snapshot.
//!
//! Only lists, tasks and the load timestamp are written, wrapped in a
//! versioned envelope `{ "state": {...}, "version": n }`. Indexes and
//! refresh state are rebuilt after loading.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::list::TaskList;
use crate::core::task::Task;
use crate::error::StorageError;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub lists: Vec<TaskList>,
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_loaded_at_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
struct EnvelopeOut<'a> {
    state: &'a PersistedState,
    version: u32,
}

/// Why a stored payload was thrown away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejected {
    NotJson,
    NotARecord,
    MissingState,
    MissingArray(&'static str),
    BadTimestamp,
    WrongVersion(Option<u64>),
    Undecodable(String),
}

pub fn encode(state: &PersistedState) -> Result<String, StorageError> {
    serde_json::to_string(&EnvelopeOut {
        state,
        version: SNAPSHOT_VERSION,
    })
    .map_err(|e| StorageError::Encode(e.to_string()))
}

/// Validate and decode a stored envelope.
pub fn decode(raw: &str) -> Result<PersistedState, Rejected> {
    let value: Value = serde_json::from_str(raw).map_err(|_| Rejected::NotJson)?;
    let envelope = value.as_object().ok_or(Rejected::NotARecord)?;

    let version = envelope.get("version").and_then(Value::as_u64);
    if version != Some(u64::from(SNAPSHOT_VERSION)) {
        return Err(Rejected::WrongVersion(version));
    }

    let state = envelope
        .get("state")
        .and_then(Value::as_object)
        .ok_or(Rejected::MissingState)?;
    for key in ["lists", "tasks"] {
        if !state.get(key).is_some_and(Value::is_array) {
            return Err(Rejected::MissingArray(key));
        }
    }
    match state.get("lastLoadedAtMs") {
        None | Some(Value::Null) => {}
        Some(v) => {
            let finite = v.as_f64().is_some_and(f64::is_finite);
            if !finite || (v.as_i64().is_none() && v.as_u64().is_none()) {
                return Err(Rejected::BadTimestamp);
            }
        }
    }

    serde_json::from_value(Value::Object(state.clone()))
        .map_err(|e| Rejected::Undecodable(e.to_string()))
}

/// Where one identity's snapshot lives.
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    async fn read(&self) -> Result<Option<String>, StorageError>;
    async fn write(&self, payload: &str) -> Result<(), StorageError>;
    async fn clear(&self) -> Result<(), StorageError>;
}

/// One JSON file per identity under the cache directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStorage for FileStorage {
    async fn read(&self) -> Result<Option<String>, StorageError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, payload: &str) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        // Write beside the target then rename so a crash never leaves half a file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, payload).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local storage. Handles made with `scoped` share one backing map,
/// each seeing only its own scope.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    slots: Arc<Mutex<HashMap<String, String>>>,
    scope: String,
}

impl MemoryStorage {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            slots: Arc::default(),
            scope: scope.into(),
        }
    }

    pub fn scoped(&self, scope: impl Into<String>) -> Self {
        Self {
            slots: self.slots.clone(),
            scope: scope.into(),
        }
    }

    pub fn put_raw(&self, payload: &str) {
        self.lock().insert(self.scope.clone(), payload.to_string());
    }

    pub fn raw(&self) -> Option<String> {
        self.lock().get(&self.scope).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SnapshotStorage for MemoryStorage {
    async fn read(&self) -> Result<Option<String>, StorageError> {
        Ok(self.raw())
    }

    async fn write(&self, payload: &str) -> Result<(), StorageError> {
        self.put_raw(payload);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.lock().remove(&self.scope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::index::tests::{list, task};

    fn state() -> PersistedState {
        PersistedState {
            lists: vec![list("L1", 1.0)],
            tasks: vec![task("T1", "L1", None, 1.0)],
            last_loaded_at_ms: Some(1_700_000_000_000),
        }
    }

    #[test]
    fn envelope_holds_only_state_and_version() {
        let raw = encode(&state()).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        let mut keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        keys.sort();
        assert_eq!(keys, vec!["state", "version"]);
        let mut state_keys: Vec<&String> = value["state"].as_object().unwrap().keys().collect();
        state_keys.sort();
        assert_eq!(state_keys, vec!["lastLoadedAtMs", "lists", "tasks"]);
        assert_eq!(decode(&raw).unwrap(), state());
    }

    #[test]
    fn rejects_structurally_invalid_payloads() {
        assert_eq!(decode("not json"), Err(Rejected::NotJson));
        assert_eq!(decode("[1,2]"), Err(Rejected::NotARecord));
        assert_eq!(
            decode(r#"{"version":1}"#),
            Err(Rejected::MissingState)
        );
        assert_eq!(
            decode(r#"{"version":1,"state":{"lists":[]}}"#),
            Err(Rejected::MissingArray("tasks"))
        );
        assert_eq!(
            decode(r#"{"version":1,"state":{"lists":{},"tasks":[]}}"#),
            Err(Rejected::MissingArray("lists"))
        );
        assert_eq!(
            decode(r#"{"version":1,"state":{"lists":[],"tasks":[],"lastLoadedAtMs":"soon"}}"#),
            Err(Rejected::BadTimestamp)
        );
        assert_eq!(
            decode(r#"{"version":1,"state":{"lists":[],"tasks":[],"lastLoadedAtMs":1e400}}"#),
            Err(Rejected::NotJson)
        );
        assert_eq!(
            decode(r#"{"version":2,"state":{"lists":[],"tasks":[]}}"#),
            Err(Rejected::WrongVersion(Some(2)))
        );
    }

    #[test]
    fn missing_timestamp_is_accepted() {
        let loaded = decode(r#"{"version":1,"state":{"lists":[],"tasks":[]}}"#).unwrap();
        assert_eq!(loaded, PersistedState::default());
    }

    #[test]
    fn undecodable_items_reject_the_payload() {
        let raw = r#"{"version":1,"state":{"lists":[{"id":1}],"tasks":[]}}"#;
        assert!(matches!(decode(raw), Err(Rejected::Undecodable(_))));
    }

    #[tokio::test]
    async fn memory_scopes_are_isolated() {
        let alice = MemoryStorage::new("alice");
        let bob = alice.scoped("bob");
        alice.write("a").await.unwrap();
        assert_eq!(bob.read().await.unwrap(), None);
        bob.write("b").await.unwrap();
        alice.clear().await.unwrap();
        assert_eq!(alice.read().await.unwrap(), None);
        assert_eq!(bob.read().await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn file_storage_round_trips_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("nested").join("snapshot-u.json"));
        assert_eq!(storage.read().await.unwrap(), None);

        storage.write("{\"a\":1}").await.unwrap();
        assert_eq!(storage.read().await.unwrap().as_deref(), Some("{\"a\":1}"));

        storage.clear().await.unwrap();
        assert_eq!(storage.read().await.unwrap(), None);
        storage.clear().await.unwrap();
    }
}

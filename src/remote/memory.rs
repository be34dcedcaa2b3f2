//! In-process remote backend.
//!
//! Behaves like the hosted API for everything the sync layer relies on:
//! token pagination, atomic conditional writes, server-assigned ids and
//! timestamps, nulled-out inaccessible items and non-nullable fields that
//! older records lack. It also counts calls and can inject failures.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{Condition, ListQuery, Page, RecordKind, RemoteApi};
use crate::error::RemoteError;

#[derive(Debug, Default)]
struct Tables {
    records: HashMap<RecordKind, Vec<Map<String, Value>>>,
    required: HashSet<(RecordKind, String)>,
    hidden: HashSet<String>,
    list_failure: Option<RemoteError>,
    create_failure: Option<(RecordKind, RemoteError)>,
    queries: Vec<ListQuery>,
}

#[derive(Debug, Default)]
pub struct CallCounts {
    pub list: AtomicUsize,
    pub get: AtomicUsize,
    pub create: AtomicUsize,
    pub update: AtomicUsize,
    pub delete: AtomicUsize,
}

#[derive(Debug, Default)]
pub struct MemoryRemote {
    tables: Mutex<Tables>,
    latency: Mutex<Option<Duration>>,
    pub calls: CallCounts,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend every call for `latency` before touching the tables.
    pub fn set_latency(&self, latency: Duration) {
        *self.lock_latency() = Some(latency);
    }

    /// Declare `field` non-nullable for `kind`; reads selecting it fail while
    /// any returned record lacks a value. Writes still land, but their
    /// response fails the same way.
    pub fn require_field(&self, kind: RecordKind, field: &str) {
        self.lock().required.insert((kind, field.to_string()));
    }

    /// Store a record verbatim, bypassing id and timestamp assignment.
    pub fn insert_raw(&self, kind: RecordKind, record: Value) {
        if let Value::Object(map) = record {
            self.lock().records.entry(kind).or_default().push(map);
        }
    }

    /// Return the record as a null item in list pages.
    pub fn hide(&self, id: &str) {
        self.lock().hidden.insert(id.to_string());
    }

    pub fn set_list_failure(&self, failure: Option<RemoteError>) {
        self.lock().list_failure = failure;
    }

    pub fn set_create_failure(&self, kind: RecordKind, failure: Option<RemoteError>) {
        self.lock().create_failure = failure.map(|f| (kind, f));
    }

    /// Every list query received, in order.
    pub fn queries(&self) -> Vec<ListQuery> {
        self.lock().queries.clone()
    }

    pub fn records(&self, kind: RecordKind) -> Vec<Value> {
        self.lock()
            .records
            .get(&kind)
            .map(|rs| rs.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    pub fn record(&self, kind: RecordKind, id: &str) -> Option<Value> {
        self.lock()
            .records
            .get(&kind)
            .and_then(|rs| rs.iter().find(|r| record_id(r) == Some(id)).cloned())
            .map(Value::Object)
    }

    pub fn count(calls: &AtomicUsize) -> usize {
        calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        [
            &self.calls.list,
            &self.calls.get,
            &self.calls.create,
            &self.calls.update,
            &self.calls.delete,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }

    pub fn write_calls(&self) -> usize {
        Self::count(&self.calls.create)
            + Self::count(&self.calls.update)
            + Self::count(&self.calls.delete)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_latency(&self) -> std::sync::MutexGuard<'_, Option<Duration>> {
        self.latency.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn pause(&self) {
        let latency = *self.lock_latency();
        match latency {
            Some(d) => tokio::time::sleep(d).await,
            None => tokio::task::yield_now().await,
        }
    }
}

fn record_id(record: &Map<String, Value>) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

fn now_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn project(record: &Map<String, Value>, fields: &[String]) -> Value {
    let selected = fields
        .iter()
        .map(|f| (f.clone(), record.get(f).cloned().unwrap_or(Value::Null)))
        .collect::<Map<_, _>>();
    Value::Object(selected)
}

fn full_selection(kind: RecordKind) -> Vec<String> {
    kind.fields().iter().map(|f| f.to_string()).collect()
}

fn check_required(
    tables: &Tables,
    kind: RecordKind,
    fields: &[String],
    records: &[&Map<String, Value>],
) -> Result<(), RemoteError> {
    for field in fields {
        if !tables.required.contains(&(kind, field.clone())) {
            continue;
        }
        let missing = records
            .iter()
            .any(|r| r.get(field).is_none_or(Value::is_null));
        if missing {
            return Err(RemoteError::SchemaMismatch {
                type_name: kind.type_name().to_string(),
                field: field.clone(),
            });
        }
    }
    Ok(())
}

#[async_trait]
impl RemoteApi for MemoryRemote {
    async fn list(&self, query: &ListQuery) -> Result<Page<Value>, RemoteError> {
        self.calls.list.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        let mut tables = self.lock();
        tables.queries.push(query.clone());
        if let Some(failure) = &tables.list_failure {
            return Err(failure.clone());
        }

        let offset = match &query.next_token {
            Some(token) => token.parse::<usize>().map_err(|_| RemoteError::Validation {
                message: format!("invalid nextToken {}", token),
            })?,
            None => 0,
        };
        let limit = query.limit.max(1) as usize;

        let matching: Vec<&Map<String, Value>> = tables
            .records
            .get(&query.kind)
            .map(|rs| {
                rs.iter()
                    .filter(|r| {
                        query.filter.as_ref().is_none_or(|f| {
                            f.matches(&Value::Object((*r).clone()))
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let window: Vec<&Map<String, Value>> =
            matching.iter().skip(offset).take(limit).copied().collect();
        let visible: Vec<&Map<String, Value>> = window
            .iter()
            .filter(|r| record_id(r).is_none_or(|id| !tables.hidden.contains(id)))
            .copied()
            .collect();
        check_required(&tables, query.kind, &query.fields, &visible)?;

        let items = window
            .iter()
            .map(|r| match record_id(r) {
                Some(id) if tables.hidden.contains(id) => None,
                _ => Some(project(r, &query.fields)),
            })
            .collect();
        let next_token = (offset + limit < matching.len()).then(|| (offset + limit).to_string());

        Ok(Page { items, next_token })
    }

    async fn get(
        &self,
        kind: RecordKind,
        id: &str,
        fields: &[String],
    ) -> Result<Option<Value>, RemoteError> {
        self.calls.get.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        let tables = self.lock();
        let Some(record) = tables
            .records
            .get(&kind)
            .and_then(|rs| rs.iter().find(|r| record_id(r) == Some(id)))
        else {
            return Ok(None);
        };
        check_required(&tables, kind, fields, &[record])?;
        Ok(Some(project(record, fields)))
    }

    async fn create(&self, kind: RecordKind, input: Value) -> Result<Value, RemoteError> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        let mut tables = self.lock();
        if let Some((failing, failure)) = &tables.create_failure {
            if *failing == kind {
                return Err(failure.clone());
            }
        }
        let Value::Object(mut record) = input else {
            return Err(RemoteError::Validation {
                message: format!("{} input must be an object", kind),
            });
        };

        let id = match record_id(&record) {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        let table = tables.records.entry(kind).or_default();
        if table.iter().any(|r| record_id(r) == Some(id.as_str())) {
            return Err(RemoteError::ConditionFailed { kind });
        }

        let now = now_string();
        record.insert("id".into(), Value::String(id));
        record.insert("createdAt".into(), Value::String(now.clone()));
        record.insert("updatedAt".into(), Value::String(now));
        table.push(record.clone());
        // Stored either way; the response selection is what can fail.
        check_required(&tables, kind, &full_selection(kind), &[&record])?;
        Ok(Value::Object(record))
    }

    async fn update(
        &self,
        kind: RecordKind,
        input: Value,
        condition: Option<&Condition>,
    ) -> Result<Value, RemoteError> {
        self.calls.update.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        let Value::Object(patch) = input else {
            return Err(RemoteError::Validation {
                message: format!("{} input must be an object", kind),
            });
        };
        let id = record_id(&patch)
            .ok_or_else(|| RemoteError::Validation {
                message: format!("{} update requires an id", kind),
            })?
            .to_string();

        let mut tables = self.lock();
        let record = tables
            .records
            .get_mut(&kind)
            .and_then(|rs| rs.iter_mut().find(|r| record_id(r) == Some(id.as_str())))
            .ok_or_else(|| RemoteError::NotFound {
                kind,
                id: id.clone(),
            })?;

        if let Some(condition) = condition {
            if !condition.matches(&Value::Object(record.clone())) {
                return Err(RemoteError::ConditionFailed { kind });
            }
        }
        for (key, value) in patch {
            record.insert(key, value);
        }
        record.insert("updatedAt".into(), Value::String(now_string()));
        let updated = record.clone();
        check_required(&tables, kind, &full_selection(kind), &[&updated])?;
        Ok(Value::Object(updated))
    }

    async fn delete(&self, kind: RecordKind, id: &str) -> Result<Value, RemoteError> {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        let mut tables = self.lock();
        let table = tables.records.entry(kind).or_default();
        let pos = table
            .iter()
            .position(|r| record_id(r) == Some(id))
            .ok_or_else(|| RemoteError::NotFound {
                kind,
                id: id.to_string(),
            })?;
        Ok(Value::Object(table.remove(pos)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn paginates_with_tokens() {
        let remote = MemoryRemote::new();
        for i in 0..5 {
            remote.insert_raw(RecordKind::List, json!({ "id": format!("L{}", i) }));
        }
        let query = ListQuery::new(RecordKind::List, &["id"]).limit(2);
        let first = remote.list(&query).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.next_token.as_deref(), Some("2"));

        let last = remote
            .list(&query.clone().after(Some("4".into())))
            .await
            .unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.next_token, None);
    }

    #[tokio::test]
    async fn conditional_update_is_rejected_when_predicate_fails() {
        let remote = MemoryRemote::new();
        remote.insert_raw(RecordKind::Profile, json!({ "id": "u", "seedVersion": -1 }));
        let cond = Condition::ne("seedVersion", -1);
        let err = remote
            .update(RecordKind::Profile, json!({ "id": "u", "seedVersion": -1 }), Some(&cond))
            .await
            .unwrap_err();
        assert!(err.is_condition_failed());
    }

    #[tokio::test]
    async fn missing_required_field_fails_only_when_selected() {
        let remote = MemoryRemote::new();
        remote.require_field(RecordKind::Task, "sortOrder");
        remote.insert_raw(RecordKind::Task, json!({ "id": "T1", "title": "old" }));

        let full = ListQuery::new(RecordKind::Task, &["id", "title", "sortOrder"]);
        let err = remote.list(&full).await.unwrap_err();
        assert_eq!(
            err,
            RemoteError::SchemaMismatch {
                type_name: "Task".into(),
                field: "sortOrder".into()
            }
        );

        let page = remote.list(&full.without_field("sortOrder")).await.unwrap();
        assert_eq!(page.items.len(), 1);
    }

    #[tokio::test]
    async fn update_lands_even_when_its_response_hits_a_legacy_null() {
        let remote = MemoryRemote::new();
        remote.require_field(RecordKind::Task, "isDemo");
        remote.insert_raw(RecordKind::Task, json!({ "id": "T1", "title": "old" }));

        let err = remote
            .update(RecordKind::Task, json!({ "id": "T1", "title": "renamed" }), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::SchemaMismatch { ref field, .. } if field == "isDemo"));
        assert_eq!(remote.record(RecordKind::Task, "T1").unwrap()["title"], "renamed");
    }

    #[tokio::test]
    async fn hidden_records_come_back_as_holes() {
        let remote = MemoryRemote::new();
        remote.insert_raw(RecordKind::Task, json!({ "id": "T1" }));
        remote.insert_raw(RecordKind::Task, json!({ "id": "T2" }));
        remote.hide("T1");
        let page = remote
            .list(&ListQuery::new(RecordKind::Task, &["id"]))
            .await
            .unwrap();
        assert_eq!(page.items, vec![None, Some(json!({ "id": "T2" }))]);
    }

    #[tokio::test]
    async fn create_assigns_identity_and_rejects_duplicates() {
        let remote = MemoryRemote::new();
        let created = remote
            .create(RecordKind::List, json!({ "name": "Inbox" }))
            .await
            .unwrap();
        assert!(created["id"].as_str().is_some());
        assert!(created["createdAt"].as_str().is_some());

        remote
            .create(RecordKind::Profile, json!({ "id": "u" }))
            .await
            .unwrap();
        let dup = remote
            .create(RecordKind::Profile, json!({ "id": "u" }))
            .await
            .unwrap_err();
        assert!(dup.is_condition_failed());
        assert_eq!(remote.get(RecordKind::Profile, "u", &fields(&["id"])).await.unwrap(), Some(json!({ "id": "u" })));
    }
}

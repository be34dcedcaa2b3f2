//! The remote data boundary.
//!
//! Records travel as JSON objects so a read can select any subset of a
//! type's fields; typed helpers at the bottom decode them into the model.

pub mod http;
pub mod memory;

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::RemoteError;
use crate::sync::resilient::get_resilient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    List,
    Task,
    Profile,
}

impl RecordKind {
    /// Type name used by the remote schema.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::List => "List",
            Self::Task => "Task",
            Self::Profile => "UserProfile",
        }
    }

    /// Full selection: what complete reads and write responses return.
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            Self::List => crate::core::list::LIST_FIELDS,
            Self::Task => crate::core::task::TASK_FIELDS,
            Self::Profile => crate::core::profile::PROFILE_FIELDS,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Field predicate evaluated atomically by the remote, used both as a write
/// condition and as a list filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    Ne(String, Value),
    Lt(String, Value),
    Exists(String),
    /// Holds when the field is absent or null.
    Missing(String),
    And(Vec<Condition>),
}

impl Condition {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::Eq(field.to_string(), value.into())
    }

    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Self::Ne(field.to_string(), value.into())
    }

    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Self::Lt(field.to_string(), value.into())
    }

    pub fn exists(field: &str) -> Self {
        Self::Exists(field.to_string())
    }

    pub fn missing(field: &str) -> Self {
        Self::Missing(field.to_string())
    }

    /// Evaluate against a stored record. Missing fields compare as null.
    pub fn matches(&self, record: &Value) -> bool {
        let field = |name: &str| record.get(name).cloned().unwrap_or(Value::Null);
        match self {
            Self::Eq(name, value) => values_equal(&field(name), value),
            Self::Ne(name, value) => !values_equal(&field(name), value),
            Self::Lt(name, value) => {
                compare_values(&field(name), value) == Some(Ordering::Less)
            }
            Self::Exists(name) => !field(name).is_null(),
            Self::Missing(name) => field(name).is_null(),
            Self::And(all) => all.iter().all(|c| c.matches(record)),
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// One paginated read request.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub kind: RecordKind,
    pub fields: Vec<String>,
    pub filter: Option<Condition>,
    pub limit: u32,
    pub next_token: Option<String>,
}

impl ListQuery {
    pub fn new(kind: RecordKind, fields: &[&str]) -> Self {
        Self {
            kind,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            filter: None,
            limit: 100,
            next_token: None,
        }
    }

    pub fn filter(mut self, filter: Condition) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn after(mut self, token: Option<String>) -> Self {
        self.next_token = token;
        self
    }

    /// Same query with `field` removed from the selection.
    pub fn without_field(&self, field: &str) -> Self {
        let mut reduced = self.clone();
        reduced.fields.retain(|f| f != field);
        reduced
    }

    pub fn selects(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }
}

/// A page of results. `None` items are records the remote nulled out.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<Option<T>>,
    pub next_token: Option<String>,
}

#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn list(&self, query: &ListQuery) -> Result<Page<Value>, RemoteError>;

    async fn get(
        &self,
        kind: RecordKind,
        id: &str,
        fields: &[String],
    ) -> Result<Option<Value>, RemoteError>;

    async fn create(&self, kind: RecordKind, input: Value) -> Result<Value, RemoteError>;

    /// Update the record named by `input["id"]`, rejected with
    /// `RemoteError::ConditionFailed` when `condition` does not hold.
    async fn update(
        &self,
        kind: RecordKind,
        input: Value,
        condition: Option<&Condition>,
    ) -> Result<Value, RemoteError>;

    async fn delete(&self, kind: RecordKind, id: &str) -> Result<Value, RemoteError>;
}

pub fn decode<T: DeserializeOwned>(kind: RecordKind, value: Value) -> Result<T, RemoteError> {
    serde_json::from_value(value).map_err(|e| RemoteError::decode(kind, e))
}

/// Decode a page, dropping nulled-out items.
pub fn decode_page<T: DeserializeOwned>(
    kind: RecordKind,
    page: Page<Value>,
) -> Result<Page<T>, RemoteError> {
    let items = page
        .items
        .into_iter()
        .map(|item| item.map(|v| decode(kind, v)).transpose())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page {
        items,
        next_token: page.next_token,
    })
}

fn to_object(kind: RecordKind, input: &impl Serialize) -> Result<Map<String, Value>, RemoteError> {
    match serde_json::to_value(input).map_err(|e| RemoteError::decode(kind, e))? {
        Value::Object(map) => Ok(map),
        other => Err(RemoteError::Validation {
            message: format!("{} input must be an object, got {}", kind, other),
        }),
    }
}

/// Create a record stamped with `owner` and decode the stored result.
pub async fn create_record<T: DeserializeOwned>(
    remote: &dyn RemoteApi,
    kind: RecordKind,
    owner: &str,
    input: &impl Serialize,
) -> Result<T, RemoteError> {
    let mut map = to_object(kind, input)?;
    map.insert("owner".into(), Value::String(owner.to_string()));
    let created = remote.create(kind, Value::Object(map)).await?;
    decode(kind, created)
}

/// Apply a partial update to the record `id` and decode the stored result.
pub async fn update_record<T: DeserializeOwned>(
    remote: &dyn RemoteApi,
    kind: RecordKind,
    id: &str,
    patch: &impl Serialize,
    condition: Option<&Condition>,
) -> Result<T, RemoteError> {
    let mut map = to_object(kind, patch)?;
    map.insert("id".into(), Value::String(id.to_string()));
    let updated = match remote.update(kind, Value::Object(map), condition).await {
        Ok(updated) => updated,
        // The write was applied; only the returned selection hit a legacy null.
        Err(RemoteError::SchemaMismatch { field, .. }) => {
            log::warn!("{} {} updated, re-reading without `{}`", kind, id, field);
            get_resilient(remote, kind, id, kind.fields())
                .await?
                .value
                .ok_or_else(|| RemoteError::NotFound {
                    kind,
                    id: id.to_string(),
                })?
        }
        Err(e) => return Err(e),
    };
    decode(kind, updated)
}

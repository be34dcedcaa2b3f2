//! Reads that survive legacy records missing newly required fields.
//!
//! When the remote refuses a read because existing records hold null in a
//! non-nullable field, the read is issued once more without that field and
//! the result is tagged as degraded.

use std::future::Future;
use std::sync::Mutex;

use serde_json::Value;

use crate::error::RemoteError;
use crate::remote::{ListQuery, Page, RecordKind, RemoteApi};

/// Fields a read may drop and still decode, per record kind.
pub fn optional_fields(kind: RecordKind) -> &'static [&'static str] {
    match kind {
        RecordKind::List => &["description", "isFavorite", "sortOrder", "isDemo"],
        RecordKind::Task => &[
            "parentTaskId",
            "sortOrder",
            "description",
            "status",
            "priority",
            "dueAt",
            "completedAt",
            "assigneeId",
            "tagIds",
            "isDemo",
        ],
        RecordKind::Profile => &["seedVersion", "seededAt"],
    }
}

/// A field that had to be left out of a read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Degraded {
    pub type_name: String,
    pub field: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    pub degraded: Option<Degraded>,
}

/// Field named by a schema-mismatch error, if `err` is one.
pub fn mismatched_field(err: &RemoteError) -> Option<(&str, &str)> {
    match err {
        RemoteError::SchemaMismatch { type_name, field } => Some((type_name, field)),
        _ => None,
    }
}

/// Run `preferred`; if it fails on a null in one of `droppable`, run
/// `fallback` for that field exactly once. Any other error propagates.
pub async fn with_fallback<T, P, F, FF>(
    droppable: &[&str],
    preferred: P,
    fallback: F,
) -> Result<Fetched<T>, RemoteError>
where
    P: Future<Output = Result<T, RemoteError>>,
    F: FnOnce(String) -> FF,
    FF: Future<Output = Result<T, RemoteError>>,
{
    let err = match preferred.await {
        Ok(value) => {
            return Ok(Fetched {
                value,
                degraded: None,
            });
        }
        Err(err) => err,
    };

    let Some((type_name, field)) = mismatched_field(&err) else {
        return Err(err);
    };
    if !droppable.contains(&field) {
        return Err(err);
    }

    let degraded = Degraded {
        type_name: type_name.to_string(),
        field: field.to_string(),
    };
    log::warn!(
        "{} records missing `{}`; retrying without it",
        degraded.type_name,
        degraded.field
    );
    let value = fallback(degraded.field.clone()).await?;
    Ok(Fetched {
        value,
        degraded: Some(degraded),
    })
}

/// Paginated reader that carries dropped fields from one page to the next.
pub struct ResilientReader<'a> {
    remote: &'a dyn RemoteApi,
    base: ListQuery,
    omitted: Mutex<Vec<String>>,
    degraded: Mutex<Vec<Degraded>>,
}

impl<'a> ResilientReader<'a> {
    pub fn new(remote: &'a dyn RemoteApi, base: ListQuery) -> Self {
        Self {
            remote,
            base,
            omitted: Mutex::new(Vec::new()),
            degraded: Mutex::new(Vec::new()),
        }
    }

    /// Start with fields already known to be missing upstream.
    pub fn omitting(self, fields: &[String]) -> Self {
        self.lock_omitted().extend(fields.iter().cloned());
        self
    }

    /// Read one page. Each legacy field the remote complains about is left
    /// out for this and every later page.
    pub async fn read_page(&self, token: Option<String>) -> Result<Page<Value>, RemoteError> {
        let droppable = optional_fields(self.base.kind);
        loop {
            let query = self.current_query().after(token.clone());
            let fetched = with_fallback(droppable, self.remote.list(&query), |field| {
                let reduced = query.without_field(&field);
                async move { self.remote.list(&reduced).await }
            })
            .await;

            match fetched {
                Ok(fetched) => {
                    if let Some(degraded) = fetched.degraded {
                        self.note(degraded);
                    }
                    return Ok(fetched.value);
                }
                // The fallback hit a second legacy field; drop it too and go again.
                Err(err) => match self.new_droppable(&err, droppable) {
                    Some(degraded) => {
                        log::warn!(
                            "{} records also missing `{}`; retrying without it",
                            degraded.type_name,
                            degraded.field
                        );
                        self.note(degraded);
                    }
                    None => return Err(err),
                },
            }
        }
    }

    /// Fields left out of every read so far.
    pub fn omitted(&self) -> Vec<String> {
        self.lock_omitted().clone()
    }

    /// Fields newly dropped by this reader.
    pub fn degraded(&self) -> Vec<Degraded> {
        self.degraded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn note(&self, degraded: Degraded) {
        self.lock_omitted().push(degraded.field.clone());
        self.degraded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(degraded);
    }

    /// The mismatch in `err`, when it names a droppable field still selected.
    fn new_droppable(&self, err: &RemoteError, droppable: &[&str]) -> Option<Degraded> {
        let (type_name, field) = mismatched_field(err)?;
        let fresh = droppable.contains(&field) && !self.lock_omitted().iter().any(|f| f == field);
        fresh.then(|| Degraded {
            type_name: type_name.to_string(),
            field: field.to_string(),
        })
    }

    fn current_query(&self) -> ListQuery {
        let omitted = self.lock_omitted();
        let mut query = self.base.clone();
        query.fields.retain(|f| !omitted.contains(f));
        query
    }

    fn lock_omitted(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.omitted.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Point read of one record with the same fallback, repeated while the
/// remote keeps naming further droppable fields.
pub async fn get_resilient(
    remote: &dyn RemoteApi,
    kind: RecordKind,
    id: &str,
    fields: &[&str],
) -> Result<Fetched<Option<Value>>, RemoteError> {
    let droppable = optional_fields(kind);
    let mut fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
    let mut dropped = None;
    loop {
        let fetched = with_fallback(droppable, remote.get(kind, id, &fields), |field| {
            let reduced: Vec<String> = fields.iter().filter(|f| **f != field).cloned().collect();
            async move { remote.get(kind, id, &reduced).await }
        })
        .await;

        let err = match fetched {
            Ok(fetched) => {
                return Ok(Fetched {
                    value: fetched.value,
                    degraded: fetched.degraded.or(dropped),
                });
            }
            Err(err) => err,
        };
        let Some((type_name, field)) = mismatched_field(&err) else {
            return Err(err);
        };
        if !droppable.contains(&field) || !fields.iter().any(|f| f == field) {
            return Err(err);
        }
        log::warn!("{} record {} also missing `{}`", type_name, id, field);
        let degraded = Degraded {
            type_name: type_name.to_string(),
            field: field.to_string(),
        };
        fields.retain(|f| *f != degraded.field);
        dropped = Some(degraded);
    }
}

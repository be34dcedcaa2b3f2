use thiserror::Error;

use crate::remote::RecordKind;

/// Failures reported by the remote boundary.
///
/// Every variant is `Clone` so a single in-flight refresh can hand the same
/// failure to all of its waiters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Network or HTTP-level failure. Never retried within one call.
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: RecordKind, id: String },

    /// A conditional write was rejected because its predicate did not hold.
    #[error("conditional check failed on {kind}")]
    ConditionFailed { kind: RecordKind },

    /// Existing records hold null in a field the schema now declares non-nullable.
    #[error("legacy {type_name} records are missing required field `{field}`")]
    SchemaMismatch { type_name: String, field: String },

    #[error("remote rejected request: {message}")]
    Validation { message: String },

    #[error("could not decode {kind} record: {message}")]
    Decode { kind: RecordKind, message: String },
}

impl RemoteError {
    pub fn is_condition_failed(&self) -> bool {
        matches!(self, Self::ConditionFailed { .. })
    }

    pub(crate) fn decode(kind: RecordKind, err: serde_json::Error) -> Self {
        Self::Decode {
            kind,
            message: err.to_string(),
        }
    }
}

/// Failures of the local storage layer holding the persisted snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(String),

    #[error("could not encode snapshot: {0}")]
    Encode(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Crate-level error for store, session, seeding and admin operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("identity {subject} is not a member of {group}")]
    Forbidden { subject: String, group: String },

    #[error("the inbox list {0} cannot be deleted")]
    InboxProtected(String),

    #[error("task {task} cannot nest under {parent}: parents must be in the same list")]
    InvalidParent { task: String, parent: String },

    #[error("refresh aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

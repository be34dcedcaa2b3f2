use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Field names selected when reading lists from the remote.
pub const LIST_FIELDS: &[&str] = &[
    "id",
    "name",
    "description",
    "isFavorite",
    "sortOrder",
    "isDemo",
    "owner",
    "createdAt",
    "updatedAt",
];

/// A named collection of tasks owned by one identity.
///
/// Fields added after the first schema revision carry serde defaults so a
/// reduced-field read still decodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskList {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub sort_order: f64,
    #[serde(default)]
    pub is_demo: bool,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskList {
    /// Exact name match after trimming both sides.
    pub fn has_name(&self, name: &str) -> bool {
        self.name.trim() == name.trim()
    }
}

/// Input for creating a list. The remote assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewList {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_favorite: bool,
    pub sort_order: f64,
    pub is_demo: bool,
}

impl NewList {
    pub fn new(name: impl Into<String>, sort_order: f64) -> Self {
        Self {
            name: name.into(),
            description: None,
            is_favorite: false,
            sort_order,
            is_demo: false,
        }
    }
}

/// Partial update of a list; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_favorite: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<f64>,
}

/// Largest sort order among `lists`, or 0 when empty.
pub fn max_sort_order(lists: &[TaskList]) -> f64 {
    lists
        .iter()
        .map(|l| l.sort_order)
        .fold(0.0, f64::max)
}

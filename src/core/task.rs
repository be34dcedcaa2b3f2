use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Field names selected when reading tasks from the remote.
pub const TASK_FIELDS: &[&str] = &[
    "id",
    "listId",
    "parentTaskId",
    "sortOrder",
    "title",
    "description",
    "status",
    "priority",
    "dueAt",
    "completedAt",
    "assigneeId",
    "tagIds",
    "isDemo",
    "owner",
    "createdAt",
    "updatedAt",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    #[default]
    Open,
    Done,
}

impl TaskStatus {
    pub fn as_keyword(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Done => "DONE",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_keyword(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

/// A unit of work inside one list, optionally nested under a parent task of
/// the same list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub list_id: String,
    #[serde(default)]
    pub parent_task_id: Option<String>,
    #[serde(default)]
    pub sort_order: f64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assignee_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tag_ids: Vec<String>,
    #[serde(default)]
    pub is_demo: bool,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn is_top_level(&self) -> bool {
        self.parent_task_id.is_none()
    }

    /// `Done` must carry a completion time and `Open` must not.
    pub fn status_consistent(&self) -> bool {
        self.status.is_done() == self.completed_at.is_some()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Completion timestamp matching `status`.
pub fn completion_for(status: TaskStatus, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match status {
        TaskStatus::Done => Some(now),
        TaskStatus::Open => None,
    }
}

/// Input for creating a task. The remote assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub list_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    pub sort_order: f64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    pub tag_ids: Vec<String>,
    pub is_demo: bool,
}

impl NewTask {
    pub fn new(list_id: impl Into<String>, title: impl Into<String>, sort_order: f64) -> Self {
        Self {
            list_id: list_id.into(),
            parent_task_id: None,
            sort_order,
            title: title.into(),
            description: None,
            status: TaskStatus::Open,
            priority: Priority::Medium,
            due_at: None,
            completed_at: None,
            assignee_id: None,
            tag_ids: Vec::new(),
            is_demo: false,
        }
    }

    pub fn under(mut self, parent_task_id: impl Into<String>) -> Self {
        self.parent_task_id = Some(parent_task_id.into());
        self
    }

    /// Set the status and the matching completion time together.
    pub fn with_status(mut self, status: TaskStatus, now: DateTime<Utc>) -> Self {
        self.status = status;
        self.completed_at = completion_for(status, now);
        self
    }
}

/// Partial update of a task; `None` leaves the field untouched, `Some(None)`
/// clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<Option<DateTime<Utc>>>,
}

impl TaskUpdate {
    /// Change the status; the completion time is always written alongside it.
    pub fn status(mut self, status: TaskStatus, now: DateTime<Utc>) -> Self {
        self.status = Some(status);
        self.completed_at = Some(completion_for(status, now));
        self
    }
}

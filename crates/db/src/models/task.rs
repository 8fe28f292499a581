use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use strum_macros::{Display, EnumIter, EnumString};
use ts_rs::TS;
use uuid::Uuid;

/// Kanban column a task currently sits in.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    TS,
    sqlx::Type,
    EnumString,
    EnumIter,
    Display,
)]
#[sqlx(type_name = "task_status", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    /// Human label used in notifications, e.g. `in progress`.
    pub fn label(&self) -> String {
        self.to_string().replace('-', " ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize, TS)]
pub struct Task {
    pub id: Uuid,
    pub board_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub assignee_id: Option<Uuid>,
    pub created_by: Uuid,
    pub attachment_url: Option<String>,
    /// Ordering hint within `(board_id, status)`; not densely packed.
    pub position: i64,
    #[ts(type = "Date")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "Date")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateTask {
    pub board_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    pub assignee_id: Option<Uuid>,
    pub created_by: Uuid,
    pub attachment_url: Option<String>,
    pub position: Option<i64>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct UpdateTask {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub assignee_id: Option<Uuid>,
    pub position: Option<i64>,
}

impl UpdateTask {
    pub fn move_to(status: TaskStatus, position: i64) -> Self {
        Self {
            status: Some(status),
            position: Some(position),
            ..Default::default()
        }
    }

    /// Writes the present fields onto `task`.
    pub fn apply(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = Some(description.clone());
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(assignee_id) = self.assignee_id {
            task.assignee_id = Some(assignee_id);
        }
        if let Some(position) = self.position {
            task.position = position;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn status_column_ids_are_kebab_case() {
        assert_eq!(TaskStatus::InProgress.to_string(), "in-progress");
        assert_eq!(TaskStatus::from_str("done").ok(), Some(TaskStatus::Done));
        assert!(TaskStatus::from_str("in_review").is_err());
        assert_eq!(TaskStatus::iter().count(), 3);
        assert_eq!(TaskStatus::InProgress.label(), "in progress");
    }

    #[test]
    fn status_serializes_as_column_id() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in-progress\"");
    }
}

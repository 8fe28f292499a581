use std::sync::Arc;

use db::{
    RecordStore, StoreError,
    models::task::{CreateTask, Task, TaskStatus},
};
use serde::Deserialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    notify::{Notification, SharedNotifier},
    task_cache::SharedTaskCache,
};

/// Form input for a new card. `status` is the column the user is adding to.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    pub assignee_id: Option<Uuid>,
    pub attachment_url: Option<String>,
}

/// Create and delete operations on the active board's tasks.
pub struct TaskCommands {
    store: Arc<dyn RecordStore>,
    notifier: SharedNotifier,
}

impl TaskCommands {
    pub fn new(store: Arc<dyn RecordStore>, notifier: SharedNotifier) -> Self {
        Self { store, notifier }
    }

    /// Appends a task to the end of its column. Blank titles are rejected
    /// here, before the store is contacted.
    #[instrument(skip(self, cache, input), fields(board_id = %cache.board_id(), status = %input.status))]
    pub async fn create_task(
        &self,
        cache: &SharedTaskCache,
        input: NewTask,
    ) -> Result<Task, StoreError> {
        let title = input.title.trim();
        if title.is_empty() {
            let error = StoreError::validation("Task title is required");
            self.notifier
                .notify(Notification::error("Error", error.to_string()));
            return Err(error);
        }

        let data = CreateTask {
            board_id: cache.board_id(),
            title: title.to_string(),
            description: non_blank(input.description),
            status: input.status,
            assignee_id: input.assignee_id,
            created_by: self.store.session_user_id(),
            attachment_url: non_blank(input.attachment_url),
            position: Some(cache.read().count_in(input.status) as i64),
        };

        match self.store.create_task(data).await {
            Ok(task) => {
                info!(task_id = %task.id, "task created");
                self.notifier.notify(Notification::success(
                    "Task Created",
                    format!("\"{}\" has been added to {}.", task.title, task.status.label()),
                ));
                Ok(task)
            }
            Err(error) => {
                warn!(?error, "failed to create task");
                self.notifier
                    .notify(Notification::error("Error Creating Task", error.to_string()));
                Err(error)
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn delete_task(&self, task_id: Uuid) -> Result<(), StoreError> {
        match self.store.delete_task(task_id).await {
            Ok(()) => {
                info!("task deleted");
                self.notifier.notify(Notification::success(
                    "Task Deleted",
                    "Task has been removed successfully.",
                ));
                Ok(())
            }
            Err(error) => {
                warn!(?error, "failed to delete task");
                self.notifier.notify(Notification::error(
                    "Error",
                    format!("Failed to delete task: {error}"),
                ));
                Err(error)
            }
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

use kanban_db::models::task::{CreateTask, Task, TaskStatus};
use sqlx::PgPool;
use uuid::Uuid;

use super::Tx;

const TASK_COLUMNS: &str = "id, board_id, title, description, status, assignee_id, created_by, \
                            attachment_url, position, created_at, updated_at";

pub struct TaskRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> TaskRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Tasks of a board in column order; ties keep creation order.
    pub async fn list(&self, board_id: Uuid) -> Result<Vec<Task>, sqlx::Error> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE board_id = $1 ORDER BY position ASC, created_at ASC"
        );
        sqlx::query_as::<_, Task>(&sql)
            .bind(board_id)
            .fetch_all(self.pool)
            .await
    }

    pub async fn find_by_id(&self, task_id: Uuid) -> Result<Option<Task>, sqlx::Error> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1");
        sqlx::query_as::<_, Task>(&sql)
            .bind(task_id)
            .fetch_optional(self.pool)
            .await
    }

    pub async fn count_in(&self, board_id: Uuid, status: TaskStatus) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM tasks WHERE board_id = $1 AND status = $2",
        )
        .bind(board_id)
        .bind(status)
        .fetch_one(self.pool)
        .await
    }

    /// `data.title` must already be trimmed and `data.position` resolved.
    pub async fn insert(&self, data: &CreateTask, position: i64) -> Result<Task, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO tasks (
                board_id, title, description, status, assignee_id, created_by,
                attachment_url, position
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {TASK_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Task>(&sql)
            .bind(data.board_id)
            .bind(&data.title)
            .bind(&data.description)
            .bind(data.status)
            .bind(data.assignee_id)
            .bind(data.created_by)
            .bind(&data.attachment_url)
            .bind(position)
            .fetch_one(self.pool)
            .await
    }

    pub async fn lock(tx: &mut Tx<'_>, task_id: Uuid) -> Result<Option<Task>, sqlx::Error> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, Task>(&sql)
            .bind(task_id)
            .fetch_optional(&mut **tx)
            .await
    }

    /// Writes every mutable column of `task` and bumps `updated_at`.
    pub async fn save(tx: &mut Tx<'_>, task: &Task) -> Result<Task, sqlx::Error> {
        let sql = format!(
            r#"
            UPDATE tasks
            SET title = $2,
                description = $3,
                status = $4,
                assignee_id = $5,
                position = $6,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {TASK_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Task>(&sql)
            .bind(task.id)
            .bind(&task.title)
            .bind(&task.description)
            .bind(task.status)
            .bind(task.assignee_id)
            .bind(task.position)
            .fetch_one(&mut **tx)
            .await
    }

    pub async fn delete(&self, task_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(task_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

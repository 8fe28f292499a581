use kanban_db::models::board::Board;
use sqlx::PgPool;
use uuid::Uuid;

use super::Tx;

pub struct BoardRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> BoardRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Boards `user_id` belongs to, newest first.
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Board>, sqlx::Error> {
        sqlx::query_as::<_, Board>(
            r#"
            SELECT b.id, b.name, b.description, b.owner_id, b.created_at, b.updated_at
            FROM boards b
            JOIN board_members m ON m.board_id = b.id
            WHERE m.user_id = $1
            ORDER BY b.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await
    }

    pub async fn find_by_id(&self, board_id: Uuid) -> Result<Option<Board>, sqlx::Error> {
        sqlx::query_as::<_, Board>(
            r#"
            SELECT id, name, description, owner_id, created_at, updated_at
            FROM boards
            WHERE id = $1
            "#,
        )
        .bind(board_id)
        .fetch_optional(self.pool)
        .await
    }

    pub async fn insert(
        &self,
        name: &str,
        description: Option<&str>,
        owner_id: Uuid,
    ) -> Result<Board, sqlx::Error> {
        sqlx::query_as::<_, Board>(
            r#"
            INSERT INTO boards (name, description, owner_id)
            VALUES ($1, $2, $3)
            RETURNING id, name, description, owner_id, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(owner_id)
        .fetch_one(self.pool)
        .await
    }

    /// Removes the board; members and tasks go with it via `ON DELETE CASCADE`.
    pub async fn delete(tx: &mut Tx<'_>, board_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM boards WHERE id = $1")
            .bind(board_id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn lock(tx: &mut Tx<'_>, board_id: Uuid) -> Result<Option<Board>, sqlx::Error> {
        sqlx::query_as::<_, Board>(
            r#"
            SELECT id, name, description, owner_id, created_at, updated_at
            FROM boards
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(board_id)
        .fetch_optional(&mut **tx)
        .await
    }
}

use kanban_db::models::board_member::{BoardMember, MemberRole};
use sqlx::PgPool;
use uuid::Uuid;

pub struct MemberRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> MemberRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn is_member(&self, board_id: Uuid, user_id: Uuid) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM board_members WHERE board_id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(board_id)
        .bind(user_id)
        .fetch_one(self.pool)
        .await
    }

    pub async fn find(
        &self,
        board_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<BoardMember>, sqlx::Error> {
        sqlx::query_as::<_, BoardMember>(
            r#"
            SELECT id, board_id, user_id, role, joined_at
            FROM board_members
            WHERE board_id = $1 AND user_id = $2
            "#,
        )
        .bind(board_id)
        .bind(user_id)
        .fetch_optional(self.pool)
        .await
    }

    pub async fn find_by_id(&self, member_id: Uuid) -> Result<Option<BoardMember>, sqlx::Error> {
        sqlx::query_as::<_, BoardMember>(
            r#"
            SELECT id, board_id, user_id, role, joined_at
            FROM board_members
            WHERE id = $1
            "#,
        )
        .bind(member_id)
        .fetch_optional(self.pool)
        .await
    }

    pub async fn list(&self, board_id: Uuid) -> Result<Vec<BoardMember>, sqlx::Error> {
        sqlx::query_as::<_, BoardMember>(
            r#"
            SELECT id, board_id, user_id, role, joined_at
            FROM board_members
            WHERE board_id = $1
            ORDER BY joined_at ASC
            "#,
        )
        .bind(board_id)
        .fetch_all(self.pool)
        .await
    }

    /// Fails with a unique violation when the user is already a member.
    pub async fn insert(
        &self,
        board_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> Result<BoardMember, sqlx::Error> {
        sqlx::query_as::<_, BoardMember>(
            r#"
            INSERT INTO board_members (board_id, user_id, role)
            VALUES ($1, $2, $3)
            RETURNING id, board_id, user_id, role, joined_at
            "#,
        )
        .bind(board_id)
        .bind(user_id)
        .bind(role)
        .fetch_one(self.pool)
        .await
    }

    pub async fn delete(&self, member_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM board_members WHERE id = $1")
            .bind(member_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

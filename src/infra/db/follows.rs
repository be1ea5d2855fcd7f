use async_trait::async_trait;
use uuid::Uuid;

use crate::application::repos::{FollowsRepo, RepoError};
use crate::domain::entities::{FollowEdge, UserRecord};

use super::types::UserRow;
use super::{PostgresRepositories, map_sqlx_error};

#[async_trait]
impl FollowsRepo for PostgresRepositories {
    async fn create_follow(&self, edge: FollowEdge) -> Result<bool, RepoError> {
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO follows (id, follower_id, author_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (follower_id, author_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(edge.follower_id())
        .bind(edge.author_id())
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(inserted.is_some())
    }

    async fn delete_follow(&self, follower_id: Uuid, author_id: Uuid) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM follows WHERE follower_id = $1 AND author_id = $2")
            .bind(follower_id)
            .bind(author_id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn is_following(&self, follower_id: Uuid, author_id: Uuid) -> Result<bool, RepoError> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM follows WHERE follower_id = $1 AND author_id = $2)",
        )
        .bind(follower_id)
        .bind(author_id)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn authors_followed_by(&self, follower_id: Uuid) -> Result<Vec<UserRecord>, RepoError> {
        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT u.id, u.username, u.created_at
            FROM follows f
            INNER JOIN users u ON u.id = f.author_id
            WHERE f.follower_id = $1
            ORDER BY u.username
            "#,
        )
        .bind(follower_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(UserRecord::from).collect())
    }
}

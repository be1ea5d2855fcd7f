use async_trait::async_trait;
use uuid::Uuid;

use crate::application::repos::{CommentsRepo, CreateCommentParams, RepoError};
use crate::domain::entities::{CommentListing, CommentRecord};

use super::types::{CommentListingRow, CommentRow};
use super::{PostgresRepositories, map_sqlx_error};

#[async_trait]
impl CommentsRepo for PostgresRepositories {
    async fn comments_by_post(&self, post_id: Uuid) -> Result<Vec<CommentListing>, RepoError> {
        let rows = sqlx::query_as::<_, CommentListingRow>(
            r#"
            SELECT c.id, c.post_id, u.username AS author_username, c.text, c.created_at
            FROM comments c
            INNER JOIN users u ON u.id = c.author_id
            WHERE c.post_id = $1
            ORDER BY c.created_at, c.id
            "#,
        )
        .bind(post_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(CommentListing::from).collect())
    }

    async fn create_comment(
        &self,
        params: CreateCommentParams,
    ) -> Result<CommentRecord, RepoError> {
        let row = sqlx::query_as::<_, CommentRow>(
            r#"
            INSERT INTO comments (id, post_id, author_id, text)
            VALUES ($1, $2, $3, $4)
            RETURNING id, post_id, author_id, text, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(params.post_id)
        .bind(params.author_id)
        .bind(params.text)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(CommentRecord::from(row))
    }
}

use async_trait::async_trait;
use sqlx::QueryBuilder;
use uuid::Uuid;

use crate::application::pagination::PageWindow;
use crate::application::repos::{
    CreatePostParams, PostFilter, PostsRepo, PostsWriteRepo, RepoError, UpdatePostParams,
};
use crate::domain::entities::{PostListing, PostRecord};

use super::types::{PostListingRow, PostRow};
use super::{POST_LISTING_SELECT, PostgresRepositories, map_sqlx_error};

#[async_trait]
impl PostsRepo for PostgresRepositories {
    async fn count_posts(&self, filter: PostFilter) -> Result<u64, RepoError> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM posts p WHERE 1=1 ");
        Self::apply_post_filter(&mut qb, filter);

        let count: i64 = qb
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Self::convert_count(count)
    }

    async fn list_posts(
        &self,
        filter: PostFilter,
        window: PageWindow,
    ) -> Result<Vec<PostListing>, RepoError> {
        let offset = i64::try_from(window.offset)
            .map_err(|_| RepoError::from_persistence("page offset exceeds supported range"))?;

        let mut qb = QueryBuilder::new(POST_LISTING_SELECT);
        Self::apply_post_filter(&mut qb, filter);
        qb.push(" ORDER BY p.created_at DESC, p.id DESC LIMIT ");
        qb.push_bind(i64::from(window.limit));
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let rows = qb
            .build_query_as::<PostListingRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(PostListing::from).collect())
    }

    async fn find_post(&self, id: Uuid) -> Result<Option<PostListing>, RepoError> {
        let mut qb = QueryBuilder::new(POST_LISTING_SELECT);
        qb.push(" AND p.id = ");
        qb.push_bind(id);

        let row = qb
            .build_query_as::<PostListingRow>()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(PostListing::from))
    }
}

#[async_trait]
impl PostsWriteRepo for PostgresRepositories {
    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError> {
        let row = sqlx::query_as::<_, PostRow>(
            r#"
            INSERT INTO posts (id, author_id, text, group_id, image)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, author_id, text, group_id, image, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(params.author_id)
        .bind(params.text)
        .bind(params.group_id)
        .bind(params.image)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(PostRecord::from(row))
    }

    async fn update_post(&self, params: UpdatePostParams) -> Result<PostRecord, RepoError> {
        let row = sqlx::query_as::<_, PostRow>(
            r#"
            UPDATE posts
            SET text = $2, group_id = $3, image = $4, updated_at = now()
            WHERE id = $1
            RETURNING id, author_id, text, group_id, image, created_at, updated_at
            "#,
        )
        .bind(params.id)
        .bind(params.text)
        .bind(params.group_id)
        .bind(params.image)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(PostRecord::from).ok_or(RepoError::NotFound)
    }
}

use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::{
    CommentListing, CommentRecord, GroupRecord, GroupSummary, PostListing, PostRecord, UserRecord,
};

#[derive(sqlx::FromRow)]
pub(crate) struct UserRow {
    pub(crate) id: Uuid,
    pub(crate) username: String,
    pub(crate) created_at: OffsetDateTime,
}

impl From<UserRow> for UserRecord {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct GroupRow {
    pub(crate) id: Uuid,
    pub(crate) title: String,
    pub(crate) slug: String,
    pub(crate) description: String,
    pub(crate) created_at: OffsetDateTime,
}

impl From<GroupRow> for GroupRecord {
    fn from(row: GroupRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            slug: row.slug,
            description: row.description,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct PostRow {
    pub(crate) id: Uuid,
    pub(crate) author_id: Uuid,
    pub(crate) text: String,
    pub(crate) group_id: Option<Uuid>,
    pub(crate) image: Option<String>,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) updated_at: OffsetDateTime,
}

impl From<PostRow> for PostRecord {
    fn from(row: PostRow) -> Self {
        Self {
            id: row.id,
            author_id: row.author_id,
            text: row.text,
            group_id: row.group_id,
            image: row.image,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Post joined with its author and optional group.
#[derive(sqlx::FromRow)]
pub(crate) struct PostListingRow {
    pub(crate) id: Uuid,
    pub(crate) text: String,
    pub(crate) image: Option<String>,
    pub(crate) author_id: Uuid,
    pub(crate) author_username: String,
    pub(crate) group_id: Option<Uuid>,
    pub(crate) group_title: Option<String>,
    pub(crate) group_slug: Option<String>,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) updated_at: OffsetDateTime,
}

impl From<PostListingRow> for PostListing {
    fn from(row: PostListingRow) -> Self {
        let group = match (row.group_id, row.group_title, row.group_slug) {
            (Some(id), Some(title), Some(slug)) => Some(GroupSummary { id, title, slug }),
            _ => None,
        };
        Self {
            id: row.id,
            text: row.text,
            image: row.image,
            author_id: row.author_id,
            author_username: row.author_username,
            group,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct CommentRow {
    pub(crate) id: Uuid,
    pub(crate) post_id: Uuid,
    pub(crate) author_id: Uuid,
    pub(crate) text: String,
    pub(crate) created_at: OffsetDateTime,
}

impl From<CommentRow> for CommentRecord {
    fn from(row: CommentRow) -> Self {
        Self {
            id: row.id,
            post_id: row.post_id,
            author_id: row.author_id,
            text: row.text,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct CommentListingRow {
    pub(crate) id: Uuid,
    pub(crate) post_id: Uuid,
    pub(crate) author_username: String,
    pub(crate) text: String,
    pub(crate) created_at: OffsetDateTime,
}

impl From<CommentListingRow> for CommentListing {
    fn from(row: CommentListingRow) -> Self {
        Self {
            id: row.id,
            post_id: row.post_id,
            author_username: row.author_username,
            text: row.text,
            created_at: row.created_at,
        }
    }
}

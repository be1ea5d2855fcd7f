//! Domain entities mirrored from persistent storage.

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::error::DomainError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRecord {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostRecord {
    pub id: Uuid,
    pub author_id: Uuid,
    pub text: String,
    pub group_id: Option<Uuid>,
    pub image: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Group fields denormalized onto a post listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSummary {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
}

/// A post joined with its author and optional group, as shown in feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostListing {
    pub id: Uuid,
    pub text: String,
    pub image: Option<String>,
    pub author_id: Uuid,
    pub author_username: String,
    pub group: Option<GroupSummary>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl PostListing {
    pub fn is_authored_by(&self, user: &UserRecord) -> bool {
        self.author_id == user.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentRecord {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub text: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentListing {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author_username: String,
    pub text: String,
    pub created_at: OffsetDateTime,
}

/// A directed follower → author pair that is guaranteed not to be a self-loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowEdge {
    follower_id: Uuid,
    author_id: Uuid,
}

impl FollowEdge {
    pub fn new(follower_id: Uuid, author_id: Uuid) -> Result<Self, DomainError> {
        if follower_id == author_id {
            return Err(DomainError::invariant("a user cannot follow themselves"));
        }
        Ok(Self {
            follower_id,
            author_id,
        })
    }

    pub fn follower_id(&self) -> Uuid {
        self.follower_id
    }

    pub fn author_id(&self) -> Uuid {
        self.author_id
    }
}

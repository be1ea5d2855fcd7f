//! Follow graph operations.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::application::repos::{FollowsRepo, RepoError, UsersRepo};
use crate::application::viewer::Viewer;
use crate::domain::entities::{FollowEdge, UserRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowOutcome {
    Created,
    AlreadyFollowing,
    /// Follower and author are the same user; nothing was written.
    SelfFollow,
}

#[derive(Debug, Error)]
pub enum FollowError {
    #[error("unknown author")]
    UnknownAuthor,
    #[error("viewer does not follow this author")]
    NotFollowing,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Clone)]
pub struct FollowService {
    users: Arc<dyn UsersRepo>,
    follows: Arc<dyn FollowsRepo>,
}

impl FollowService {
    pub fn new(users: Arc<dyn UsersRepo>, follows: Arc<dyn FollowsRepo>) -> Self {
        Self { users, follows }
    }

    pub async fn follow(
        &self,
        follower: &UserRecord,
        author_username: &str,
    ) -> Result<FollowOutcome, FollowError> {
        let author = self.author(author_username).await?;
        let Ok(edge) = FollowEdge::new(follower.id, author.id) else {
            return Ok(FollowOutcome::SelfFollow);
        };

        let created = self.follows.create_follow(edge).await?;
        if created {
            info!(
                target = "quill::follow",
                follower = %follower.username,
                author = %author.username,
                "follow edge created"
            );
            Ok(FollowOutcome::Created)
        } else {
            Ok(FollowOutcome::AlreadyFollowing)
        }
    }

    pub async fn unfollow(
        &self,
        follower: &UserRecord,
        author_username: &str,
    ) -> Result<(), FollowError> {
        let author = self.author(author_username).await?;
        if !self.follows.delete_follow(follower.id, author.id).await? {
            return Err(FollowError::NotFollowing);
        }
        info!(
            target = "quill::follow",
            follower = %follower.username,
            author = %author.username,
            "follow edge removed"
        );
        Ok(())
    }

    /// False for anonymous viewers and for the author looking at themselves.
    pub async fn is_following(
        &self,
        viewer: &Viewer,
        author: &UserRecord,
    ) -> Result<bool, FollowError> {
        match viewer.user() {
            Some(user) if user.id != author.id => {
                Ok(self.follows.is_following(user.id, author.id).await?)
            }
            _ => Ok(false),
        }
    }

    pub async fn authors_followed_by(
        &self,
        user: &UserRecord,
    ) -> Result<Vec<UserRecord>, FollowError> {
        Ok(self.follows.authors_followed_by(user.id).await?)
    }

    async fn author(&self, username: &str) -> Result<UserRecord, FollowError> {
        self.users
            .find_user_by_username(username)
            .await?
            .ok_or(FollowError::UnknownAuthor)
    }
}

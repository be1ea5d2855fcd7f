//! Feed composition for the four listing views.

use std::num::NonZeroU32;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::application::pagination::{Page, Paginator};
use crate::application::follow::{FollowError, FollowService};
use crate::application::repos::{GroupsRepo, PostFilter, PostsRepo, RepoError, UsersRepo};
use crate::application::viewer::Viewer;
use crate::domain::entities::{GroupRecord, PostListing, UserRecord};

/// Which listing to compose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedView {
    All,
    Group(String),
    Author(String),
    Following,
}

/// What a composed feed is about, with the data its page header needs.
#[derive(Debug, Clone)]
pub enum FeedSubject {
    All,
    Group(GroupRecord),
    Author {
        author: UserRecord,
        following: bool,
    },
    Following {
        authors: Vec<UserRecord>,
    },
}

#[derive(Debug, Clone)]
pub struct Feed {
    pub subject: FeedSubject,
    pub page: Page<PostListing>,
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("unknown group")]
    UnknownGroup,
    #[error("unknown author")]
    UnknownAuthor,
    #[error("the follow feed requires an authenticated viewer")]
    AuthenticationRequired,
    #[error(transparent)]
    Follow(#[from] FollowError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Clone)]
pub struct FeedService {
    posts: Arc<dyn PostsRepo>,
    groups: Arc<dyn GroupsRepo>,
    users: Arc<dyn UsersRepo>,
    follows: Arc<FollowService>,
    page_size: NonZeroU32,
}

impl FeedService {
    pub fn new(
        posts: Arc<dyn PostsRepo>,
        groups: Arc<dyn GroupsRepo>,
        users: Arc<dyn UsersRepo>,
        follows: Arc<FollowService>,
        page_size: NonZeroU32,
    ) -> Self {
        Self {
            posts,
            groups,
            users,
            follows,
            page_size,
        }
    }

    pub async fn compose(
        &self,
        view: FeedView,
        page_param: Option<&str>,
        viewer: &Viewer,
    ) -> Result<Feed, FeedError> {
        let (subject, filter) = self.resolve_subject(view, viewer).await?;
        let page = self.page(filter, page_param).await?;
        debug!(
            target = "quill::feed",
            page = page.number,
            num_pages = page.num_pages,
            total = page.total,
            "feed composed"
        );
        Ok(Feed { subject, page })
    }

    async fn resolve_subject(
        &self,
        view: FeedView,
        viewer: &Viewer,
    ) -> Result<(FeedSubject, PostFilter), FeedError> {
        match view {
            FeedView::All => Ok((FeedSubject::All, PostFilter::All)),
            FeedView::Group(slug) => {
                let group = self
                    .groups
                    .find_group_by_slug(&slug)
                    .await?
                    .ok_or(FeedError::UnknownGroup)?;
                let filter = PostFilter::Group(group.id);
                Ok((FeedSubject::Group(group), filter))
            }
            FeedView::Author(username) => {
                let author = self
                    .users
                    .find_user_by_username(&username)
                    .await?
                    .ok_or(FeedError::UnknownAuthor)?;
                let following = self.follows.is_following(viewer, &author).await?;
                let filter = PostFilter::Author(author.id);
                Ok((FeedSubject::Author { author, following }, filter))
            }
            FeedView::Following => {
                let user = viewer.user().ok_or(FeedError::AuthenticationRequired)?;
                let authors = self.follows.authors_followed_by(user).await?;
                Ok((
                    FeedSubject::Following { authors },
                    PostFilter::FollowedBy(user.id),
                ))
            }
        }
    }

    async fn page(
        &self,
        filter: PostFilter,
        page_param: Option<&str>,
    ) -> Result<Page<PostListing>, RepoError> {
        let total = self.posts.count_posts(filter).await?;
        let paginator = Paginator::new(self.page_size, total);
        let window = paginator.resolve(page_param);
        let items = if total == 0 {
            Vec::new()
        } else {
            self.posts.list_posts(filter, window).await?
        };
        Ok(paginator.page(window, items))
    }
}

//! Post detail, authoring and commenting.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::application::repos::{
    CommentsRepo, CreateCommentParams, CreatePostParams, GroupsRepo, PostFilter, PostsRepo,
    PostsWriteRepo, RepoError, UpdatePostParams,
};
use crate::domain::entities::{
    CommentListing, CommentRecord, GroupRecord, PostListing, PostRecord, UserRecord,
};
use crate::domain::error::DomainError;
use crate::domain::posts::{self, GROUP_INVALID};
use crate::infra::uploads::{UploadStorage, UploadStorageError};

/// Image file attached to a post form.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub data: Bytes,
}

/// Submitted post form, prior to validation.
#[derive(Debug, Clone, Default)]
pub struct PostInput {
    pub text: String,
    /// Group id as submitted; empty means no group.
    pub group: String,
    pub image: Option<ImageUpload>,
}

/// Field-level validation messages for redisplaying a form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormErrors {
    pub text: Option<String>,
    pub group: Option<String>,
    pub image: Option<String>,
}

impl FormErrors {
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.group.is_none() && self.image.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct PostDetail {
    pub post: PostListing,
    pub comments: Vec<CommentListing>,
    pub author_posts: u64,
}

#[derive(Debug, Clone)]
pub enum EditAccess {
    Allowed(PostListing),
    Denied,
}

#[derive(Debug, Clone)]
pub enum EditOutcome {
    Updated(PostRecord),
    Denied,
}

#[derive(Debug, Error)]
pub enum PostError {
    #[error("post not found")]
    UnknownPost,
    #[error("submitted form is invalid")]
    Invalid(FormErrors),
    #[error("failed to store image")]
    Upload(#[from] UploadStorageError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

struct ValidPost {
    text: String,
    group_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct PostService {
    reader: Arc<dyn PostsRepo>,
    writer: Arc<dyn PostsWriteRepo>,
    groups: Arc<dyn GroupsRepo>,
    comments: Arc<dyn CommentsRepo>,
    uploads: Arc<UploadStorage>,
}

impl PostService {
    pub fn new(
        reader: Arc<dyn PostsRepo>,
        writer: Arc<dyn PostsWriteRepo>,
        groups: Arc<dyn GroupsRepo>,
        comments: Arc<dyn CommentsRepo>,
        uploads: Arc<UploadStorage>,
    ) -> Self {
        Self {
            reader,
            writer,
            groups,
            comments,
            uploads,
        }
    }

    pub async fn groups(&self) -> Result<Vec<GroupRecord>, PostError> {
        Ok(self.groups.list_groups().await?)
    }

    pub async fn detail(&self, post_id: Uuid) -> Result<PostDetail, PostError> {
        let post = self.find(post_id).await?;
        let comments = self.comments.comments_by_post(post.id).await?;
        let author_posts = self
            .reader
            .count_posts(PostFilter::Author(post.author_id))
            .await?;
        Ok(PostDetail {
            post,
            comments,
            author_posts,
        })
    }

    pub async fn create(
        &self,
        author: &UserRecord,
        input: &PostInput,
    ) -> Result<PostRecord, PostError> {
        let valid = self.validate(input).await?;
        let image = self.store_image(input.image.as_ref()).await?;

        let record = self
            .writer
            .create_post(CreatePostParams {
                author_id: author.id,
                text: valid.text,
                group_id: valid.group_id,
                image,
            })
            .await?;

        info!(
            target = "quill::posts",
            post_id = %record.id,
            author = %author.username,
            "post created"
        );
        Ok(record)
    }

    /// Only the author may edit; everyone else is turned away without an error.
    pub async fn edit_access(
        &self,
        editor: &UserRecord,
        post_id: Uuid,
    ) -> Result<EditAccess, PostError> {
        let post = self.find(post_id).await?;
        if post.is_authored_by(editor) {
            Ok(EditAccess::Allowed(post))
        } else {
            Ok(EditAccess::Denied)
        }
    }

    pub async fn edit(
        &self,
        editor: &UserRecord,
        post_id: Uuid,
        input: &PostInput,
    ) -> Result<EditOutcome, PostError> {
        let post = match self.edit_access(editor, post_id).await? {
            EditAccess::Allowed(post) => post,
            EditAccess::Denied => return Ok(EditOutcome::Denied),
        };

        let valid = self.validate(input).await?;
        let image = match self.store_image(input.image.as_ref()).await? {
            Some(stored) => Some(stored),
            None => post.image,
        };

        let record = self
            .writer
            .update_post(UpdatePostParams {
                id: post.id,
                text: valid.text,
                group_id: valid.group_id,
                image,
            })
            .await?;

        info!(target = "quill::posts", post_id = %record.id, "post updated");
        Ok(EditOutcome::Updated(record))
    }

    pub async fn add_comment(
        &self,
        author: &UserRecord,
        post_id: Uuid,
        text: &str,
    ) -> Result<CommentRecord, PostError> {
        let post = self.find(post_id).await?;
        let text = posts::normalize_comment_text(text).map_err(|err| {
            PostError::Invalid(FormErrors {
                text: Some(validation_message(err)),
                ..FormErrors::default()
            })
        })?;

        let comment = self
            .comments
            .create_comment(CreateCommentParams {
                post_id: post.id,
                author_id: author.id,
                text,
            })
            .await?;

        info!(
            target = "quill::posts",
            post_id = %post.id,
            comment_id = %comment.id,
            "comment added"
        );
        Ok(comment)
    }

    async fn find(&self, post_id: Uuid) -> Result<PostListing, PostError> {
        self.reader
            .find_post(post_id)
            .await?
            .ok_or(PostError::UnknownPost)
    }

    async fn validate(&self, input: &PostInput) -> Result<ValidPost, PostError> {
        let mut errors = FormErrors::default();

        let text = match posts::normalize_post_text(&input.text) {
            Ok(text) => Some(text),
            Err(err) => {
                errors.text = Some(validation_message(err));
                None
            }
        };

        let group_id = match self.resolve_group(&input.group).await? {
            Ok(group_id) => group_id,
            Err(message) => {
                errors.group = Some(message);
                None
            }
        };

        if let Some(image) = &input.image {
            if let Err(err) = posts::validate_image_name(&image.file_name) {
                errors.image = Some(validation_message(err));
            }
        }

        match text {
            Some(text) if errors.is_empty() => Ok(ValidPost { text, group_id }),
            _ => Err(PostError::Invalid(errors)),
        }
    }

    /// Outer error is a store failure; inner error is a message for the form.
    async fn resolve_group(&self, raw: &str) -> Result<Result<Option<Uuid>, String>, PostError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Ok(None));
        }
        let Ok(id) = Uuid::parse_str(raw) else {
            return Ok(Err(GROUP_INVALID.to_string()));
        };
        match self.groups.find_group_by_id(id).await? {
            Some(group) => Ok(Ok(Some(group.id))),
            None => Ok(Err(GROUP_INVALID.to_string())),
        }
    }

    async fn store_image(&self, image: Option<&ImageUpload>) -> Result<Option<String>, PostError> {
        match image {
            Some(image) => {
                let stored = self
                    .uploads
                    .store_post_image(&image.file_name, image.data.clone())
                    .await?;
                Ok(Some(stored.stored_path))
            }
            None => Ok(None),
        }
    }
}

fn validation_message(err: DomainError) -> String {
    match err {
        DomainError::Validation { message } => message,
        other => other.to_string(),
    }
}

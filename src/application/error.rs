use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{feed::FeedError, follow::FollowError, posts::PostError},
    infra::error::InfraError,
    presentation::views,
};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn not_found(source: &'static str, detail: impl Into<String>) -> Self {
        Self::new(source, StatusCode::NOT_FOUND, "Page not found", detail)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = if self.status == StatusCode::NOT_FOUND {
            views::render_not_found_response()
        } else {
            (self.status, self.public_message).into_response()
        };
        self.report.attach(&mut response);
        response
    }
}

impl From<FeedError> for HttpError {
    fn from(error: FeedError) -> Self {
        const SOURCE: &str = "infra::http::feed_error_to_http_error";
        match error {
            FeedError::UnknownGroup => {
                HttpError::not_found(SOURCE, "Group slug did not match any group")
            }
            FeedError::UnknownAuthor => {
                HttpError::not_found(SOURCE, "Username did not match any author")
            }
            FeedError::AuthenticationRequired => HttpError::new(
                SOURCE,
                StatusCode::UNAUTHORIZED,
                "Authentication required",
                "Follow feed requested by an anonymous viewer",
            ),
            FeedError::Follow(err) => HttpError::from(err),
            FeedError::Repo(err) => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                &err,
            ),
        }
    }
}

impl From<FollowError> for HttpError {
    fn from(error: FollowError) -> Self {
        const SOURCE: &str = "infra::http::follow_error_to_http_error";
        match error {
            FollowError::UnknownAuthor => {
                HttpError::not_found(SOURCE, "Username did not match any author")
            }
            FollowError::NotFollowing => {
                HttpError::not_found(SOURCE, "No follow edge to remove")
            }
            FollowError::Repo(err) => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                &err,
            ),
        }
    }
}

impl From<PostError> for HttpError {
    fn from(error: PostError) -> Self {
        const SOURCE: &str = "infra::http::post_error_to_http_error";
        match error {
            PostError::UnknownPost => HttpError::not_found(SOURCE, "Post id did not match any post"),
            PostError::Invalid(errors) => HttpError::new(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Request could not be processed",
                format!("{errors:?}"),
            ),
            PostError::Upload(err) => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to store upload",
                &err,
            ),
            PostError::Repo(err) => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                &err,
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::repos::RepoError;

    #[test]
    fn feed_not_found_errors_render_not_found_page() {
        let response = HttpError::from(FeedError::UnknownGroup).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("report attached");
        assert_eq!(report.source, "infra::http::feed_error_to_http_error");
    }

    #[test]
    fn repository_failures_map_to_internal_error() {
        let error = HttpError::from(FollowError::Repo(RepoError::Timeout));
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn missing_follow_edge_is_not_found() {
        let error = HttpError::from(FollowError::NotFollowing);
        assert_eq!(error.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn app_errors_describe_their_cause() {
        let infra = AppError::from(InfraError::database("pool closed"));
        assert_eq!(infra.to_string(), "database error: pool closed");

        let validation = AppError::validation("slug must not be empty");
        assert_eq!(validation.to_string(), "validation failed: slug must not be empty");
    }
}

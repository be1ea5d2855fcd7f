//! Viewer resolution from the trusted proxy header.
//!
//! Authentication happens upstream: the proxy forwards the signed-in username
//! in `auth.user_header`. A present, non-empty value becomes
//! [`Viewer::User`] after the user row is ensured; anything else is anonymous.

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{HeaderMap, Request, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::convert::Infallible;
use tracing::debug;

use crate::application::viewer::Viewer;
use crate::config::AuthSettings;
use crate::domain::entities::UserRecord;
use crate::presentation::views::login_href;

use super::public::HttpState;
use super::repo_error_to_http;

const SOURCE: &str = "infra::http::viewer::resolve_viewer";

pub async fn resolve_viewer(
    State(state): State<HttpState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let viewer = match trusted_username(request.headers(), &state.auth) {
        Some(username) => match state.users.ensure_user(&username).await {
            Ok(user) => Viewer::User(user),
            Err(err) => return repo_error_to_http(SOURCE, err).into_response(),
        },
        None => Viewer::Anonymous,
    };

    debug!(
        target = "quill::http::viewer",
        viewer = viewer.username().unwrap_or("-"),
        "viewer resolved"
    );
    request.extensions_mut().insert(viewer.clone());
    let mut response = next.run(request).await;
    response.extensions_mut().insert(viewer);
    response
}

fn trusted_username(headers: &HeaderMap, auth: &AuthSettings) -> Option<String> {
    headers
        .get(&auth.user_header)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Viewer>().cloned().unwrap_or_default())
    }
}

/// A signed-in viewer. Anonymous requests are redirected to the login page.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserRecord);

impl FromRequestParts<HttpState> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &HttpState,
    ) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<Viewer>() {
            Some(Viewer::User(user)) => Ok(CurrentUser(user.clone())),
            _ => {
                let next = parts
                    .uri
                    .path_and_query()
                    .map(|value| value.as_str())
                    .unwrap_or("/");
                Err(login_redirect(&state.auth.login_path, next))
            }
        }
    }
}

/// `303 See Other` to the login page, remembering where to return.
pub fn login_redirect(login_path: &str, next: &str) -> Response {
    Redirect::to(&login_href(login_path, next)).into_response()
}

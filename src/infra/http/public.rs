use std::{io::ErrorKind, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use bytes::Bytes;
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::{
    application::{
        error::HttpError,
        feed::{FeedService, FeedView},
        follow::FollowService,
        posts::{EditAccess, EditOutcome, PostError, PostService},
        repos::{HealthProbe, UsersRepo},
        viewer::Viewer,
    },
    cache::{OutputCacheState, cache_page},
    config::AuthSettings,
    domain::entities::{GroupRecord, UserRecord},
    infra::uploads::{UploadStorage, UploadStorageError},
    presentation::views::{
        self, PostFormContext, post_detail_page, post_form_page, post_path, profile_path,
        render_not_found_response,
    },
};

use super::{
    db_health_response,
    forms::SubmittedForm,
    middleware::{log_responses, set_request_context},
    viewer::{CurrentUser, resolve_viewer},
};

#[derive(Clone)]
pub struct HttpState {
    pub feed: Arc<FeedService>,
    pub posts: Arc<PostService>,
    pub follows: Arc<FollowService>,
    pub users: Arc<dyn UsersRepo>,
    pub health: Arc<dyn HealthProbe>,
    pub upload_storage: Arc<UploadStorage>,
    pub auth: AuthSettings,
    pub cache: Option<OutputCacheState>,
    pub upload_limit_bytes: usize,
}

pub fn build_router(state: HttpState) -> Router {
    // Only the all-posts listing is cached, under one shared key.
    let cached_routes = Router::new().route("/", get(index));
    let cached_routes = if let Some(cache_state) = state.cache.clone() {
        cached_routes.route_layer(middleware::from_fn_with_state(
            cache_state.index_view(),
            cache_page,
        ))
    } else {
        cached_routes
    };

    Router::new()
        .merge(cached_routes)
        .route("/group/{slug}/", get(group_index))
        .route("/profile/{username}/", get(profile))
        .route("/profile/{username}/follow/", get(profile_follow))
        .route("/profile/{username}/unfollow/", get(profile_unfollow))
        .route("/follow/", get(follow_index))
        .route("/create/", get(post_create_form).post(post_create))
        .route("/posts/{id}/", get(post_detail))
        .route("/posts/{id}/edit/", get(post_edit_form).post(post_edit))
        .route("/posts/{id}/comment/", post(add_comment))
        .route("/media/{*path}", get(serve_upload))
        .route("/_health/db", get(public_health))
        .fallback(fallback)
        .layer(middleware::from_fn_with_state(state.clone(), resolve_viewer))
        .layer(DefaultBodyLimit::max(state.upload_limit_bytes))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    page: Option<String>,
}

async fn index(
    State(state): State<HttpState>,
    viewer: Viewer,
    Query(query): Query<PageQuery>,
) -> Response {
    feed_response(&state, FeedView::All, &query, &viewer).await
}

async fn group_index(
    State(state): State<HttpState>,
    viewer: Viewer,
    Path(slug): Path<String>,
    Query(query): Query<PageQuery>,
) -> Response {
    feed_response(&state, FeedView::Group(slug), &query, &viewer).await
}

async fn profile(
    State(state): State<HttpState>,
    viewer: Viewer,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> Response {
    feed_response(&state, FeedView::Author(username), &query, &viewer).await
}

async fn follow_index(
    State(state): State<HttpState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<PageQuery>,
) -> Response {
    let viewer = Viewer::User(user);
    feed_response(&state, FeedView::Following, &query, &viewer).await
}

async fn feed_response(
    state: &HttpState,
    view: FeedView,
    query: &PageQuery,
    viewer: &Viewer,
) -> Response {
    match state.feed.compose(view, query.page.as_deref(), viewer).await {
        Ok(feed) => views::feed_page(&feed, viewer),
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn profile_follow(
    State(state): State<HttpState>,
    CurrentUser(user): CurrentUser,
    Path(username): Path<String>,
) -> Response {
    match state.follows.follow(&user, &username).await {
        Ok(_) => Redirect::to(&profile_path(&username)).into_response(),
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn profile_unfollow(
    State(state): State<HttpState>,
    CurrentUser(user): CurrentUser,
    Path(username): Path<String>,
) -> Response {
    match state.follows.unfollow(&user, &username).await {
        Ok(()) => Redirect::to(&profile_path(&username)).into_response(),
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn post_detail(
    State(state): State<HttpState>,
    viewer: Viewer,
    Path(raw_id): Path<String>,
) -> Response {
    let id = match parse_post_id(&raw_id) {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    match state.posts.detail(id).await {
        Ok(detail) => post_detail_page(&detail, &viewer, &state.auth.login_path, None),
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn post_create_form(
    State(state): State<HttpState>,
    CurrentUser(user): CurrentUser,
) -> Response {
    match state.posts.groups().await {
        Ok(groups) => post_form_page(PostFormContext::blank(&groups), &Viewer::User(user)),
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn post_create(
    State(state): State<HttpState>,
    CurrentUser(user): CurrentUser,
    SubmittedForm(input): SubmittedForm,
) -> Response {
    match state.posts.create(&user, &input).await {
        Ok(_) => Redirect::to(&profile_path(&user.username)).into_response(),
        Err(PostError::Invalid(errors)) => {
            let context = |groups: &[GroupRecord]| {
                PostFormContext::with_errors("/create/".to_string(), false, &input, errors, groups)
            };
            redisplay_form(&state, user, context).await
        }
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn post_edit_form(
    State(state): State<HttpState>,
    CurrentUser(user): CurrentUser,
    Path(raw_id): Path<String>,
) -> Response {
    let id = match parse_post_id(&raw_id) {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    let post = match state.posts.edit_access(&user, id).await {
        Ok(EditAccess::Allowed(post)) => post,
        Ok(EditAccess::Denied) => return Redirect::to(&post_path(id)).into_response(),
        Err(err) => return HttpError::from(err).into_response(),
    };
    match state.posts.groups().await {
        Ok(groups) => post_form_page(PostFormContext::for_post(&post, &groups), &Viewer::User(user)),
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn post_edit(
    State(state): State<HttpState>,
    CurrentUser(user): CurrentUser,
    Path(raw_id): Path<String>,
    SubmittedForm(input): SubmittedForm,
) -> Response {
    let id = match parse_post_id(&raw_id) {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    match state.posts.edit(&user, id, &input).await {
        Ok(EditOutcome::Updated(_) | EditOutcome::Denied) => {
            Redirect::to(&post_path(id)).into_response()
        }
        Err(PostError::Invalid(errors)) => {
            let action = views::post_edit_path(id);
            let context = |groups: &[GroupRecord]| {
                PostFormContext::with_errors(action, true, &input, errors, groups)
            };
            redisplay_form(&state, user, context).await
        }
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn redisplay_form(
    state: &HttpState,
    user: UserRecord,
    context: impl FnOnce(&[GroupRecord]) -> PostFormContext,
) -> Response {
    match state.posts.groups().await {
        Ok(groups) => post_form_page(context(&groups), &Viewer::User(user)),
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn add_comment(
    State(state): State<HttpState>,
    CurrentUser(user): CurrentUser,
    Path(raw_id): Path<String>,
    SubmittedForm(input): SubmittedForm,
) -> Response {
    let id = match parse_post_id(&raw_id) {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };
    match state.posts.add_comment(&user, id, &input.text).await {
        Ok(_) => Redirect::to(&post_path(id)).into_response(),
        Err(PostError::Invalid(errors)) => match state.posts.detail(id).await {
            Ok(detail) => {
                let rejected = (input.text.as_str(), errors.text.unwrap_or_default());
                post_detail_page(
                    &detail,
                    &Viewer::User(user),
                    &state.auth.login_path,
                    Some(rejected),
                )
            }
            Err(err) => HttpError::from(err).into_response(),
        },
        Err(err) => HttpError::from(err).into_response(),
    }
}

/// Malformed ids cannot name a post, so they are reported as missing.
fn parse_post_id(raw: &str) -> Result<Uuid, HttpError> {
    Uuid::parse_str(raw).map_err(|_| {
        HttpError::not_found(
            "infra::http::public::parse_post_id",
            format!("`{raw}` is not a post id"),
        )
    })
}

async fn serve_upload(State(state): State<HttpState>, Path(path): Path<String>) -> Response {
    const SOURCE: &str = "infra::http::public::serve_upload";

    match state.upload_storage.read(&path).await {
        Ok(bytes) => build_upload_response(&path, bytes),
        Err(UploadStorageError::InvalidPath) => {
            HttpError::not_found(SOURCE, "The requested upload is not available").into_response()
        }
        Err(UploadStorageError::Io(err)) if err.kind() == ErrorKind::NotFound => {
            HttpError::not_found(SOURCE, "The requested upload is not available").into_response()
        }
        Err(err) => {
            error!(
                target = SOURCE,
                path = %path,
                error = %err,
                "failed to read stored upload"
            );
            HttpError::new(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read uploaded file",
                err.to_string(),
            )
            .into_response()
        }
    }
}

fn build_upload_response(path: &str, bytes: Bytes) -> Response {
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );

    response
}

async fn public_health(State(state): State<HttpState>) -> Response {
    db_health_response(state.health.check().await)
}

async fn fallback() -> Response {
    render_not_found_response()
}

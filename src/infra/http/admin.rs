//! Operator listener: output cache control and health.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tracing::info;

use crate::application::repos::HealthProbe;
use crate::cache::OutputCacheState;

use super::db_health_response;
use super::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct AdminState {
    pub cache: Option<OutputCacheState>,
    pub health: Arc<dyn HealthProbe>,
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/cache/clear", post(clear_cache))
        .route("/_health/db", get(admin_health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn clear_cache(State(state): State<AdminState>) -> Response {
    if let Some(cache) = state.cache.as_ref() {
        cache.clear();
        info!(target = "quill::http::admin", "output cache cleared by operator");
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn admin_health(State(state): State<AdminState>) -> Response {
    db_health_response(state.health.check().await)
}

//! Output cache middleware.
//!
//! Wraps a single view: the first GET inside the TTL window runs the handler
//! and stores the rendered response under the view's fixed key, later GETs
//! replay it byte for byte. The key ignores query string and viewer.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, header},
    middleware::Next,
    response::Response,
};
use http_body_util::BodyExt;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::config::{INDEX_PAGE_KEY, OutputCacheConfig};
use super::store::{CachedResponse, MemoryOutputCache, OutputCache};

/// Shared cache handle plus its configuration.
#[derive(Clone)]
pub struct OutputCacheState {
    pub config: OutputCacheConfig,
    pub store: Arc<dyn OutputCache>,
}

impl OutputCacheState {
    pub fn new(config: OutputCacheConfig, store: Arc<dyn OutputCache>) -> Self {
        Self { config, store }
    }

    /// State backed by an in-process LRU store.
    pub fn in_memory(config: OutputCacheConfig) -> Self {
        let store = Arc::new(MemoryOutputCache::new(&config));
        Self { config, store }
    }

    /// Cache binding for the all-posts listing.
    pub fn index_view(&self) -> CachedView {
        CachedView {
            key: INDEX_PAGE_KEY,
            ttl: self.config.index_ttl,
            store: Arc::clone(&self.store),
        }
    }

    pub fn clear(&self) {
        self.store.clear();
        debug!(target = "quill::cache", "output cache cleared");
    }
}

/// A view bound to one cache key and lifetime.
#[derive(Clone)]
pub struct CachedView {
    pub key: &'static str,
    pub ttl: Duration,
    pub store: Arc<dyn OutputCache>,
}

#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn cache_page(
    State(view): State<CachedView>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    if let Some(cached) = view.store.get(view.key) {
        counter!("quill_output_cache_hit_total").increment(1);
        debug!(target = "quill::cache", outcome = "hit", "serving cached response");
        return cached.into_response();
    }

    counter!("quill_output_cache_miss_total").increment(1);
    debug!(target = "quill::cache", outcome = "miss", "rendering view");

    let response = next.run(request).await;
    if !should_store_response(&response) {
        return response;
    }

    match buffer_response(response).await {
        Ok((rebuilt, cached)) => {
            view.store.set(view.key, cached, view.ttl);
            counter!("quill_output_cache_store_total").increment(1);
            rebuilt
        }
        Err((rebuilt, error)) => {
            warn!(target = "quill::cache", error = %error, "response not cached");
            rebuilt
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error("failed to buffer response body: {0}")]
    Buffer(String),
}

/// Only successful responses that do not set cookies may be shared.
pub fn should_store_response(response: &Response) -> bool {
    response.status().is_success() && !response.headers().contains_key(header::SET_COOKIE)
}

pub async fn buffer_response(
    response: Response,
) -> Result<(Response, CachedResponse), (Response, CacheStoreError)> {
    let (parts, body) = response.into_parts();
    match BodyExt::collect(body).await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            let cached = CachedResponse::new(parts.status, &parts.headers, bytes.clone());
            let rebuilt = Response::from_parts(parts, Body::from(bytes));
            Ok((rebuilt, cached))
        }
        Err(error) => {
            let rebuilt = Response::from_parts(parts, Body::empty());
            Err((rebuilt, CacheStoreError::Buffer(error.to_string())))
        }
    }
}

//! Output cache storage.
//!
//! Entries are whole rendered responses stored under a string key with an
//! absolute expiry. Expiry uses tokio's clock so paused-time tests can
//! advance past it.

use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::Response,
};
use bytes::Bytes;
use lru::LruCache;
use tokio::time::Instant;

use super::config::OutputCacheConfig;
use super::lock::{CacheEntries, CacheOp};

/// Rendered response captured for replay.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Bytes,
}

impl CachedResponse {
    pub fn new(status: StatusCode, headers: &HeaderMap, body: Bytes) -> Self {
        let stored_headers = headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Self {
            status,
            headers: stored_headers,
            body,
        }
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_response(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;

        let headers = response.headers_mut();
        headers.clear();
        for (name, value) in self.headers {
            headers.append(name, value);
        }

        response
    }
}

/// Key-value store for rendered output with per-entry time-to-live.
pub trait OutputCache: Send + Sync {
    /// Return the entry if present and not yet expired.
    fn get(&self, key: &str) -> Option<CachedResponse>;

    fn set(&self, key: &str, value: CachedResponse, ttl: Duration);

    /// Evict every entry.
    fn clear(&self);
}

struct Entry {
    value: CachedResponse,
    expires_at: Instant,
}

/// In-process [`OutputCache`] with LRU eviction.
pub struct MemoryOutputCache {
    entries: CacheEntries<LruCache<String, Entry>>,
}

impl MemoryOutputCache {
    pub fn new(config: &OutputCacheConfig) -> Self {
        Self {
            entries: CacheEntries::new(LruCache::new(config.max_entries)),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.read(CacheOp::Get).len()
    }
}

impl OutputCache for MemoryOutputCache {
    fn get(&self, key: &str) -> Option<CachedResponse> {
        let mut entries = self.entries.write(CacheOp::Get);
        let expired = match entries.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => {
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    fn set(&self, key: &str, value: CachedResponse, ttl: Duration) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write(CacheOp::Set).put(key.to_string(), entry);
    }

    fn clear(&self) {
        self.entries.write(CacheOp::Clear).clear();
    }
}

//! Quill output cache.
//!
//! Memoizes rendered listing pages for a short window. The cache is an
//! injected service ([`OutputCacheState`]) rather than process-global state,
//! so each router and each test owns its own store.
//!
//! ```toml
//! [cache]
//! enabled = true
//! index_ttl_seconds = 20
//! max_entries = 16
//! ```

mod config;
mod lock;
mod middleware;
mod store;

pub use config::{INDEX_PAGE_KEY, OutputCacheConfig};
pub use middleware::{
    CacheStoreError, CachedView, OutputCacheState, buffer_response, cache_page,
    should_store_response,
};
pub use store::{CachedResponse, MemoryOutputCache, OutputCache};

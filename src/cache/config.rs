//! Output cache configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

/// Cache key under which the all-posts listing is stored.
pub const INDEX_PAGE_KEY: &str = "index_page";

const DEFAULT_INDEX_TTL: Duration = Duration::from_secs(20);
const DEFAULT_MAX_ENTRIES: NonZeroUsize = match NonZeroUsize::new(16) {
    Some(value) => value,
    None => unreachable!(),
};

#[derive(Debug, Clone)]
pub struct OutputCacheConfig {
    pub enabled: bool,
    /// Lifetime of the cached index listing.
    pub index_ttl: Duration,
    pub max_entries: NonZeroUsize,
}

impl Default for OutputCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            index_ttl: DEFAULT_INDEX_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl From<&crate::config::CacheSettings> for OutputCacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            index_ttl: settings.index_ttl,
            max_entries: settings.max_entries,
        }
    }
}

//! Lock guarding the output cache entries.
//!
//! A panic while a request holds the lock poisons it. The entries are plain
//! rendered pages, so the cache keeps serving them and logs the recovery.

use std::sync::{RwLock, RwLockWriteGuard};

use tracing::warn;

/// Cache operation that took the lock, recorded when recovering from poison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheOp {
    Get,
    Set,
    Clear,
}

impl CacheOp {
    fn as_str(self) -> &'static str {
        match self {
            CacheOp::Get => "get",
            CacheOp::Set => "set",
            CacheOp::Clear => "clear",
        }
    }
}

pub(crate) struct CacheEntries<T> {
    inner: RwLock<T>,
}

impl<T> CacheEntries<T> {
    pub(crate) fn new(entries: T) -> Self {
        Self {
            inner: RwLock::new(entries),
        }
    }

    #[cfg(test)]
    pub(crate) fn read(&self, op: CacheOp) -> std::sync::RwLockReadGuard<'_, T> {
        self.inner.read().unwrap_or_else(|poisoned| {
            log_recovery(op, "rwlock.read");
            poisoned.into_inner()
        })
    }

    pub(crate) fn write(&self, op: CacheOp) -> RwLockWriteGuard<'_, T> {
        self.inner.write().unwrap_or_else(|poisoned| {
            log_recovery(op, "rwlock.write");
            poisoned.into_inner()
        })
    }
}

fn log_recovery(op: CacheOp, lock_kind: &'static str) {
    warn!(
        cache_op = op.as_str(),
        target_module = "cache::store",
        lock_kind,
        result = "poisoned_recovered",
        "Recovered from poisoned output cache lock"
    );
}

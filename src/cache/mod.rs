// src/cache/mod.rs
//! The persistent per-package cache backing fact storage.
//!
//! The driver distinguishes exactly one failure: `Missing`. Anything else
//! is logged and treated as a miss by callers.

use std::sync::Mutex;

use rustc_hash::FxHashMap;
use thiserror::Error;

pub mod disk;

pub use disk::DiskCache;

#[derive(Debug, Error)]
pub enum CacheError {
    /// No entry for this (package, key). The only outcome callers react
    /// to specifically.
    #[error("cache entry is missing")]
    Missing,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Key-value storage scoped to a package.
pub trait PackageCache: Send + Sync {
    fn put(&self, pkg_path: &str, key: &str, data: Vec<u8>) -> Result<(), CacheError>;
    fn get(&self, pkg_path: &str, key: &str) -> Result<Vec<u8>, CacheError>;
    /// Drop stale entries. Runs once at the end of a driver invocation.
    fn trim(&self);
}

/// In-memory cache; backs tests and single-process embedders.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<FxHashMap<(String, String), Vec<u8>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PackageCache for MemoryCache {
    fn put(&self, pkg_path: &str, key: &str, data: Vec<u8>) -> Result<(), CacheError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((pkg_path.to_string(), key.to_string()), data);
        Ok(())
    }

    fn get(&self, pkg_path: &str, key: &str) -> Result<Vec<u8>, CacheError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(pkg_path.to_string(), key.to_string()))
            .cloned()
            .ok_or(CacheError::Missing)
    }

    fn trim(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_cache_round_trips() {
        let cache = MemoryCache::new();
        cache.put("p", "a/facts", vec![1, 2, 3]).expect("put");
        assert_eq!(cache.get("p", "a/facts").expect("get"), vec![1, 2, 3]);
    }

    #[test]
    fn missing_entry_is_distinguished() {
        let cache = MemoryCache::new();
        assert!(matches!(cache.get("p", "k"), Err(CacheError::Missing)));
    }

    #[test]
    fn entries_are_scoped_to_the_package() {
        let cache = MemoryCache::new();
        cache.put("p1", "k", vec![1]).expect("put");
        assert!(matches!(cache.get("p2", "k"), Err(CacheError::Missing)));
    }
}

// src/cache/disk.rs
//! On-disk package cache.
//!
//! One file per (package, key) under a root directory. File names embed a
//! digest of the package path, so distinct packages never collide even
//! when their keys match. `trim` drops entries this run never touched
//! once they age past the retention window.

use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rustc_hash::{FxHashSet, FxHasher};
use tracing::{debug, warn};

use super::{CacheError, PackageCache};

/// Entries untouched for this long are eligible for trimming.
const RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub struct DiskCache {
    root: PathBuf,
    /// Files read or written this run; trim keeps them.
    used: Mutex<FxHashSet<PathBuf>>,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(DiskCache {
            root,
            used: Mutex::new(FxHashSet::default()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, pkg_path: &str, key: &str) -> PathBuf {
        let mut hasher = FxHasher::default();
        pkg_path.hash(&mut hasher);
        let digest = hasher.finish();
        self.root
            .join(format!("{digest:016x}-{}", key.replace(['/', '\\'], "-")))
    }

    fn mark_used(&self, path: PathBuf) {
        self.used
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path);
    }
}

impl PackageCache for DiskCache {
    fn put(&self, pkg_path: &str, key: &str, data: Vec<u8>) -> Result<(), CacheError> {
        let path = self.entry_path(pkg_path, key);
        fs::write(&path, data)?;
        self.mark_used(path);
        Ok(())
    }

    fn get(&self, pkg_path: &str, key: &str) -> Result<Vec<u8>, CacheError> {
        let path = self.entry_path(pkg_path, key);
        match fs::read(&path) {
            Ok(data) => {
                self.mark_used(path);
                Ok(data)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CacheError::Missing),
            Err(e) => Err(e.into()),
        }
    }

    fn trim(&self) {
        let used = self.used.lock().unwrap_or_else(|e| e.into_inner());
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("failed to trim cache at {}: {}", self.root.display(), e);
                return;
            }
        };

        let mut removed = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            if used.contains(&path) {
                continue;
            }
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|m| m.elapsed().ok())
                .is_some_and(|age| age > RETENTION);
            if stale {
                if let Err(e) = fs::remove_file(&path) {
                    warn!("failed to remove stale cache entry {}: {}", path.display(), e);
                } else {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!(removed, "trimmed cache entries");
        }
    }
}

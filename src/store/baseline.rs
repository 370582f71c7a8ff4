//! Persistent record of the last-synced body of every tracked page.
//!
//! One `<page_id>.md` per page under a hidden directory. The baseline is the
//! common ancestor for three-way merges, so a write must never tear: content
//! goes to a temp file first and is renamed into place.

use crate::domain::PageId;
use crate::error::SyncError;
use crate::parser::frontmatter;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct BaselineStore {
    dir: PathBuf,
}

impl BaselineStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Idempotent; creates the storage directory if absent.
    pub fn initialize(&self) -> Result<(), SyncError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| SyncError::Baseline(format!("failed to create {}: {e}", self.dir.display())))
    }

    pub fn is_initialized(&self) -> bool {
        self.dir.is_dir()
    }

    fn path_for(&self, id: &PageId) -> PathBuf {
        self.dir.join(format!("{id}.md"))
    }

    /// Last saved body for `id`. A missing or unreadable file is simply "no
    /// baseline" — a corrupt entry must degrade the merge, not abort the sync.
    pub fn get(&self, id: &PageId) -> Option<String> {
        let path = self.path_for(id);
        match std::fs::read_to_string(&path) {
            Ok(body) => Some(body),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(page_id = %id, error = %e, "baseline entry unreadable, treating as absent");
                None
            }
        }
    }

    /// Overwrite the baseline for `id`. Durable before return: written to a
    /// sibling temp file, synced, then renamed over the entry.
    pub fn put(&self, id: &PageId, body: &str) -> Result<(), SyncError> {
        let path = self.path_for(id);
        let tmp = self.dir.join(format!("{id}.md.tmp"));

        let write = || -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(body.as_bytes())?;
            file.sync_all()?;
            std::fs::rename(&tmp, &path)?;
            Ok(())
        };

        write().map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            SyncError::Baseline(format!("failed to write baseline for {id}: {e}"))
        })
    }

    pub fn remove(&self, id: &PageId) {
        let path = self.path_for(id);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(page_id = %id, error = %e, "failed to remove baseline entry");
            }
        }
    }

    /// Refresh every tracked page's baseline from its current local file,
    /// front-matter stripped. Individual failures are logged and skipped so
    /// one bad entry cannot spoil the end-of-cycle refresh. Returns how many
    /// entries were refreshed.
    pub fn bulk_refresh(&self, tracked: &BTreeMap<PageId, PathBuf>, local_root: &Path) -> usize {
        let mut refreshed = 0;

        for (id, rel_path) in tracked {
            let path = local_root.join(rel_path);
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!(page_id = %id, path = %path.display(), error = %e,
                        "skipping baseline refresh, file unreadable");
                    continue;
                }
            };

            let body = match frontmatter::split_front_matter(&content) {
                Some((_, body)) => body.to_string(),
                None => content,
            };

            match self.put(id, &body) {
                Ok(()) => refreshed += 1,
                Err(e) => {
                    tracing::warn!(page_id = %id, error = %e, "skipping baseline refresh");
                }
            }
        }

        tracing::info!(refreshed, total = tracked.len(), "baseline refresh complete");
        refreshed
    }
}

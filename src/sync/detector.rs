//! Deterministic change classification.
//!
//! Pure set algebra over three views of the world: the tracked map from the
//! previous cycle, the current local scan, and the current remote walk. No
//! I/O happens here; the orchestrator feeds the maps in and executes what
//! comes out.

use crate::domain::{
    DeleteInfo, LocalPage, MoveDirection, MoveInfo, PageId, RemotePageMeta,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use xxhash_rust::xxh3::xxh3_64;

/// Deletions found by comparing the tracked map against both current sets.
#[derive(Debug, Default)]
pub struct DeletionSet {
    /// Tracked, still on disk, gone from the remote: delete the local file.
    pub deleted_remotely: Vec<DeleteInfo>,
    /// Tracked, still remote, gone from disk: delete the remote page.
    pub deleted_locally: Vec<DeleteInfo>,
}

/// Moves found by comparing paths against the tracked map.
#[derive(Debug, Default)]
pub struct MoveSet {
    /// The remote hierarchy changed: relocate the local file.
    pub moved_remotely: Vec<MoveInfo>,
    /// The local file moved: reparent the remote page.
    pub moved_locally: Vec<MoveInfo>,
}

/// A page deleted on one side is one that the previous cycle tracked, that
/// still exists on the *other* side, and that is missing from the side in
/// question. Pages missing from both sides just fall out of the tracked map.
pub fn detect_deletions(
    tracked: &BTreeMap<PageId, PathBuf>,
    local: &HashMap<PageId, LocalPage>,
    remote: &HashMap<PageId, RemotePageMeta>,
) -> DeletionSet {
    let mut result = DeletionSet::default();

    for (id, tracked_path) in tracked {
        let in_local = local.contains_key(id);
        let in_remote = remote.contains_key(id);

        if in_local && !in_remote {
            result.deleted_remotely.push(DeleteInfo {
                page_id: id.clone(),
                path: local
                    .get(id)
                    .map(|p| p.path.clone())
                    .unwrap_or_else(|| tracked_path.clone()),
            });
        } else if !in_local && in_remote {
            result.deleted_locally.push(DeleteInfo {
                page_id: id.clone(),
                path: tracked_path.clone(),
            });
        }
    }

    result
}

/// A move is a tracked page present on both sides whose path no longer
/// matches the tracked one. The remote's expected path comes from its
/// ancestor chain; the local path is wherever the file actually sits.
pub fn detect_moves(
    tracked: &BTreeMap<PageId, PathBuf>,
    local: &HashMap<PageId, LocalPage>,
    remote: &HashMap<PageId, RemotePageMeta>,
) -> MoveSet {
    let mut result = MoveSet::default();

    for (id, tracked_path) in tracked {
        let (Some(local_page), Some(remote_meta)) = (local.get(id), remote.get(id)) else {
            continue;
        };

        if remote_meta.relative_path != *tracked_path {
            result.moved_remotely.push(MoveInfo {
                page_id: id.clone(),
                title: remote_meta.title.clone(),
                old_path: local_page.path.clone(),
                new_path: remote_meta.relative_path.clone(),
                direction: MoveDirection::RemoteToLocal,
            });
        }

        if local_page.path != *tracked_path {
            result.moved_locally.push(MoveInfo {
                page_id: id.clone(),
                title: remote_meta.title.clone(),
                old_path: tracked_path.clone(),
                new_path: local_page.path.clone(),
                direction: MoveDirection::LocalToRemote,
            });
        }
    }

    result
}

/// Ids that may carry content changes: tracked and present on both sides.
/// Sorted for deterministic processing order.
pub fn content_candidates(
    tracked: &BTreeMap<PageId, PathBuf>,
    local: &HashMap<PageId, LocalPage>,
    remote: &HashMap<PageId, RemotePageMeta>,
) -> Vec<PageId> {
    tracked
        .keys()
        .filter(|id| local.contains_key(*id) && remote.contains_key(*id))
        .cloned()
        .collect()
}

/// Ids on exactly one side and not tracked: new pages.
pub fn new_remote_ids(
    tracked: &BTreeMap<PageId, PathBuf>,
    local: &HashMap<PageId, LocalPage>,
    remote: &HashMap<PageId, RemotePageMeta>,
) -> Vec<PageId> {
    let mut ids: Vec<PageId> = remote
        .keys()
        .filter(|id| !tracked.contains_key(*id) && !local.contains_key(*id))
        .cloned()
        .collect();
    ids.sort();
    ids
}

pub fn new_local_ids(
    tracked: &BTreeMap<PageId, PathBuf>,
    local: &HashMap<PageId, LocalPage>,
    remote: &HashMap<PageId, RemotePageMeta>,
) -> Vec<PageId> {
    let mut ids: Vec<PageId> = local
        .keys()
        .filter(|id| !tracked.contains_key(*id) && !remote.contains_key(*id))
        .cloned()
        .collect();
    ids.sort();
    ids
}

/// Ids present on both sides at once with no tracked history: the page is
/// new but appeared everywhere before a cycle could record it (a shared
/// template, a restored backup). It gets no baseline-driven resolution; the
/// orchestrator settles the tie by the configured direction.
pub fn first_seen_both_ids(
    tracked: &BTreeMap<PageId, PathBuf>,
    local: &HashMap<PageId, LocalPage>,
    remote: &HashMap<PageId, RemotePageMeta>,
) -> Vec<PageId> {
    let mut ids: Vec<PageId> = local
        .keys()
        .filter(|id| !tracked.contains_key(*id) && remote.contains_key(*id))
        .cloned()
        .collect();
    ids.sort();
    ids
}

fn hash(body: &str) -> u64 {
    xxh3_64(body.as_bytes())
}

/// The hybrid change criterion. Modification times are the fast path; the
/// baseline comparison is the authority that survives clock skew and
/// touch-without-edit. A missing baseline always counts as changed so the
/// page gets a real resolution pass.
pub fn is_potentially_changed(
    baseline: Option<&str>,
    local_body: &str,
    local_modified: Option<DateTime<Utc>>,
    remote_body: &str,
    remote_modified: DateTime<Utc>,
    last_synced: Option<DateTime<Utc>>,
) -> bool {
    if let Some(last) = last_synced {
        if local_modified.map(|m| m > last).unwrap_or(true) {
            return true;
        }
        if remote_modified > last {
            return true;
        }
    } else {
        // never synced before, everything is fair game
        return true;
    }

    let Some(base) = baseline else {
        return true;
    };

    hash(base) != hash(local_body) || hash(base) != hash(remote_body)
}

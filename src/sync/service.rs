//! The sync orchestrator: one engine per space binding, driving a full cycle
//! through its phases in strict order.
//!
//! Phase order is load → discover → delete → move → content → baseline →
//! state. Remote fetches fan out over a bounded worker pool; everything that
//! mutates disk or state runs sequentially on the orchestrator task so the
//! failure semantics stay simple.

use crate::config::{SpaceBinding, SyncState, TieBreak};
use crate::content::ContentConverter;
use crate::domain::{Classification, LocalPage, PageId, RemotePage, RemotePageMeta, SyncSummary};
use crate::error::{RemoteError, SyncError};
use crate::merge::resolver::{self, Resolution};
use crate::merge::tool::MergeTool;
use crate::parser::frontmatter;
use crate::remote::PageOperations;
use crate::store::{BaselineStore, VersionCache};
use crate::sync::detector;
use crate::sync::discovery::{self, LocalScan};
use crate::sync::mover::MoveDeleteHandler;
use rand::Rng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Parallelism for remote fetches during discovery and content sync.
const MAX_FETCH_WORKERS: usize = 10;
/// How long cached remote bodies stay trustworthy.
const CACHE_MAX_AGE_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Bidirectional,
    ForcePush,
    ForcePull,
    DryRun,
}

/// What one cycle produced: the counters plus the tracked map to persist.
#[derive(Debug)]
pub struct CycleResult {
    pub summary: SyncSummary,
    pub tracked: BTreeMap<PageId, PathBuf>,
}

pub struct SpaceEngine {
    binding: SpaceBinding,
    remote: Arc<dyn PageOperations>,
    converter: Arc<dyn ContentConverter>,
    baseline: BaselineStore,
    cache: Arc<VersionCache>,
    handler: MoveDeleteHandler,
    merge_tool: Option<MergeTool>,
    tiebreak: TieBreak,
    page_limit: usize,
    fetch_workers: usize,
}

impl SpaceEngine {
    pub fn new(
        binding: SpaceBinding,
        remote: Arc<dyn PageOperations>,
        converter: Arc<dyn ContentConverter>,
        page_limit: usize,
    ) -> Self {
        let baseline = BaselineStore::new(binding.baseline_dir());
        let cache = Arc::new(VersionCache::new(binding.cache_dir(), CACHE_MAX_AGE_DAYS));
        let handler = MoveDeleteHandler::new(Arc::clone(&remote), binding.local_path.clone());
        Self {
            binding,
            remote,
            converter,
            baseline,
            cache,
            handler,
            merge_tool: None,
            tiebreak: TieBreak::default(),
            page_limit,
            fetch_workers: MAX_FETCH_WORKERS,
        }
    }

    pub fn with_merge_tool(mut self, tool: Option<MergeTool>) -> Self {
        self.merge_tool = tool;
        self
    }

    pub fn with_tiebreak(mut self, tiebreak: TieBreak) -> Self {
        self.tiebreak = tiebreak;
        self
    }

    #[cfg(test)]
    pub fn with_store_dirs(mut self, baseline_dir: PathBuf, cache_dir: PathBuf) -> Self {
        self.baseline = BaselineStore::new(baseline_dir);
        self.cache = Arc::new(VersionCache::new(cache_dir, CACHE_MAX_AGE_DAYS));
        self
    }

    /// Drive one cycle in the requested mode. Auth and reachability failures
    /// abort with an error; everything narrower lands in the summary.
    pub async fn run_cycle(
        &self,
        state: &SyncState,
        mode: SyncMode,
        single_file: Option<&Path>,
    ) -> Result<CycleResult, SyncError> {
        if !self.baseline.is_initialized() {
            self.baseline.initialize()?;
        }

        // Phase: discovery on both sides.
        let mut scan =
            discovery::scan_local_pages(&self.binding.local_path, &self.binding.space_key);
        let exclusions: HashSet<PageId> =
            self.binding.exclude_page_ids.iter().cloned().collect();
        scan.pages.retain(|id, _| !exclusions.contains(id));

        let tree = self
            .remote
            .list_descendants(
                &self.binding.root_page_id,
                &self.binding.space_key,
                self.page_limit,
                &exclusions,
            )
            .await?;
        let mut remote_pages = discovery::flatten_hierarchy(&tree, self.binding.exclude_root);
        remote_pages.retain(|id, _| !exclusions.contains(id));

        let mut tracked = state.tracked_pages.clone();

        // Single-file mode narrows every set to the one page the file maps to.
        if let Some(file) = single_file {
            let id = self.single_file_id(file, &scan)?;
            scan.pages.retain(|page_id, _| *page_id == id);
            scan.untracked.clear();
            remote_pages.retain(|page_id, _| *page_id == id);
            tracked.retain(|page_id, _| *page_id == id);
        }

        match mode {
            SyncMode::ForcePush => self.run_force_push(&scan).await,
            SyncMode::ForcePull => self.run_force_pull(&scan, &remote_pages).await,
            SyncMode::Bidirectional | SyncMode::DryRun => {
                self.run_bidirectional(state, mode == SyncMode::DryRun, scan, remote_pages, tracked)
                    .await
            }
        }
    }

    fn single_file_id(&self, file: &Path, scan: &LocalScan) -> Result<PageId, SyncError> {
        let relative = file
            .strip_prefix(&self.binding.local_path)
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|_| file.to_path_buf());

        scan.pages
            .values()
            .find(|page| page.path == relative)
            .and_then(|page| page.page_id.clone())
            .ok_or_else(|| {
                SyncError::General(format!(
                    "{} has no page id in its front-matter; single-file sync only works for pages that already exist remotely",
                    file.display()
                ))
            })
    }

    async fn run_bidirectional(
        &self,
        state: &SyncState,
        dry_run: bool,
        mut scan: LocalScan,
        mut remote_pages: HashMap<PageId, RemotePageMeta>,
        tracked: BTreeMap<PageId, PathBuf>,
    ) -> Result<CycleResult, SyncError> {
        let mut summary = SyncSummary::default();

        // Phase: deletions, before moves, so a delete-then-reuse of a path
        // cannot collide with a move into it.
        let deletions = detector::detect_deletions(&tracked, &scan.pages, &remote_pages);
        for del in &deletions.deleted_remotely {
            tracing::debug!(page_id = %del.page_id, class = ?Classification::DeletedRemotely, "classified");
        }
        for del in &deletions.deleted_locally {
            tracing::debug!(page_id = %del.page_id, class = ?Classification::DeletedLocally, "classified");
        }
        let mut failed_remote_deletes: HashSet<PageId> = HashSet::new();

        if dry_run {
            for del in &deletions.deleted_remotely {
                summary
                    .plan
                    .push(format!("delete local file {}", del.path.display()));
            }
            for del in &deletions.deleted_locally {
                summary
                    .plan
                    .push(format!("delete remote page {}", del.page_id));
            }
        }

        let local_del = self.handler.delete_local_files(&deletions.deleted_remotely, dry_run);
        summary.deleted_local += local_del.succeeded.len();
        for (id, msg) in local_del.failed {
            summary.record_failure(id, msg);
        }
        if !dry_run {
            for id in &local_del.succeeded {
                scan.pages.remove(id);
                self.baseline.remove(id);
                self.cache.invalidate(id);
            }
        }

        let remote_del = self
            .handler
            .delete_remote_pages(&deletions.deleted_locally, dry_run)
            .await;
        summary.deleted_remote += remote_del.succeeded.len();
        for (id, msg) in remote_del.failed {
            failed_remote_deletes.insert(id.clone());
            summary.record_failure(id, msg);
        }
        if !dry_run {
            for id in &remote_del.succeeded {
                remote_pages.remove(id);
                self.baseline.remove(id);
                self.cache.invalidate(id);
            }
        }

        // Phase: moves, before content, so content lands at final paths.
        let moves = detector::detect_moves(&tracked, &scan.pages, &remote_pages);
        for mv in &moves.moved_remotely {
            tracing::debug!(page_id = %mv.page_id, class = ?Classification::MovedRemotely, "classified");
        }
        for mv in &moves.moved_locally {
            tracing::debug!(page_id = %mv.page_id, class = ?Classification::MovedLocally, "classified");
        }

        if dry_run {
            for mv in &moves.moved_remotely {
                summary.plan.push(format!(
                    "move local file {} -> {}",
                    mv.old_path.display(),
                    mv.new_path.display()
                ));
            }
            for mv in &moves.moved_locally {
                summary
                    .plan
                    .push(format!("reparent remote page {} ({})", mv.page_id, mv.title));
            }
        }

        let local_moves = self.handler.move_local_files(&moves.moved_remotely, dry_run);
        summary.moved_local += local_moves.succeeded.len();
        for (id, msg) in local_moves.failed {
            summary.record_failure(id, msg);
        }
        if !dry_run {
            for mv in &moves.moved_remotely {
                if local_moves.succeeded.contains(&mv.page_id) {
                    if let Some(page) = scan.pages.get_mut(&mv.page_id) {
                        page.path = mv.new_path.clone();
                    }
                }
            }
        }

        let remote_moves = self
            .handler
            .reparent_remote_pages(&moves.moved_locally, dry_run)
            .await;
        summary.moved_remote += remote_moves.succeeded.len();
        for (id, msg) in remote_moves.failed {
            summary.record_failure(id, msg);
        }
        if !dry_run {
            for mv in &moves.moved_locally {
                if remote_moves.succeeded.contains(&mv.page_id) {
                    if let Some(meta) = remote_pages.get_mut(&mv.page_id) {
                        meta.relative_path = mv.new_path.clone();
                    }
                }
            }
        }

        // Phase: content. Fetch bodies for every candidate, every new remote
        // page, and every first-seen-on-both-sides page concurrently, then
        // apply resolutions sequentially.
        let candidates = detector::content_candidates(&tracked, &scan.pages, &remote_pages);
        let new_remote = detector::new_remote_ids(&tracked, &scan.pages, &remote_pages);
        let first_seen = detector::first_seen_both_ids(&tracked, &scan.pages, &remote_pages);

        let mut wanted: Vec<RemotePageMeta> = Vec::new();
        for id in candidates
            .iter()
            .chain(new_remote.iter())
            .chain(first_seen.iter())
        {
            if let Some(meta) = remote_pages.get(id) {
                wanted.push(meta.clone());
            }
        }
        let mut fetched = self.fetch_pages(wanted).await;

        let mut conflicted_ids: HashSet<PageId> = HashSet::new();

        for id in &candidates {
            let Some(local_page) = scan.pages.get(id) else { continue };
            let remote_page = match self.take_fetched(&mut fetched, id, &mut summary)? {
                Some(page) => page,
                None => continue,
            };

            let baseline = self.baseline.get(id);
            if !detector::is_potentially_changed(
                baseline.as_deref(),
                &local_page.body,
                local_page.modified,
                &remote_page.body,
                remote_page.modified,
                state.last_synced,
            ) {
                summary.unchanged += 1;
                continue;
            }

            let resolution = resolver::resolve(baseline.as_deref(), &local_page.body, &remote_page.body);
            tracing::debug!(page_id = %id, class = ?classification_of(&resolution), "classified");
            match resolution {
                Resolution::Unchanged => summary.unchanged += 1,
                Resolution::Converged => {
                    if !dry_run {
                        if let Err(e) = self.baseline.put(id, &local_page.body) {
                            tracing::warn!(page_id = %id, error = %e, "baseline refresh skipped");
                        }
                    }
                    summary.unchanged += 1;
                }
                Resolution::PushOnly => {
                    if crate::merge::diff3::contains_conflict_markers(&local_page.body) {
                        // a marked file from an earlier cycle that nobody
                        // resolved yet; pushing it would publish the markers
                        tracing::warn!(page_id = %id,
                            "file still contains conflict markers, waiting for manual resolution");
                        summary
                            .conflict_paths
                            .push(self.binding.local_path.join(&local_page.path));
                        conflicted_ids.insert(id.clone());
                    } else if dry_run {
                        summary
                            .plan
                            .push(format!("push {}", local_page.path.display()));
                        summary.pushed += 1;
                    } else {
                        match self.push_body(id, &remote_page, &local_page.body).await? {
                            true => {
                                summary.pushed += 1;
                            }
                            false => summary.record_failure(id.clone(), "push failed"),
                        }
                    }
                }
                Resolution::PullOnly => {
                    if dry_run {
                        summary
                            .plan
                            .push(format!("pull {}", local_page.path.display()));
                        summary.pulled += 1;
                    } else {
                        match self.write_local(&local_page.path, &remote_page.body, id) {
                            Ok(()) => summary.pulled += 1,
                            Err(e) => summary.record_failure(id.clone(), e.to_string()),
                        }
                    }
                }
                Resolution::Merged(outcome) => {
                    // a dry run must not launch an interactive tool or touch
                    // scratch files; it only reports the conflict
                    let outcome = if dry_run {
                        outcome
                    } else {
                        self.maybe_run_merge_tool(id, &baseline, local_page, &remote_page, outcome)
                    };
                    if outcome.has_conflict {
                        if dry_run {
                            summary.plan.push(format!(
                                "conflict in {} (manual resolution required)",
                                local_page.path.display()
                            ));
                        } else if let Err(e) = self.write_local(&local_page.path, &outcome.text, id) {
                            summary.record_failure(id.clone(), e.to_string());
                            continue;
                        }
                        summary
                            .conflict_paths
                            .push(self.binding.local_path.join(&local_page.path));
                        conflicted_ids.insert(id.clone());
                    } else if dry_run {
                        summary
                            .plan
                            .push(format!("merge {}", local_page.path.display()));
                        summary.merged += 1;
                    } else {
                        if let Err(e) = self.write_local(&local_page.path, &outcome.text, id) {
                            summary.record_failure(id.clone(), e.to_string());
                            continue;
                        }
                        match self.push_body(id, &remote_page, &outcome.text).await? {
                            true => {
                                summary.merged += 1;
                            }
                            false => summary.record_failure(id.clone(), "push of merged content failed"),
                        }
                    }
                }
            }
        }

        // Pages that appeared on both sides before any cycle tracked them.
        // There is no baseline to merge against, so the configured direction
        // settles the tie; identical bodies are simply adopted.
        for id in &first_seen {
            let Some(local_page) = scan.pages.get(id) else { continue };
            let remote_page = match self.take_fetched(&mut fetched, id, &mut summary)? {
                Some(page) => page,
                None => continue,
            };

            if local_page.body == remote_page.body {
                tracing::debug!(page_id = %id, class = ?Classification::Unchanged, "classified");
                summary.unchanged += 1;
                continue;
            }

            match self.tiebreak {
                TieBreak::Push => {
                    tracing::debug!(page_id = %id, class = ?Classification::NewLocal, "classified");
                    if dry_run {
                        summary.plan.push(format!(
                            "push {} (first seen on both sides)",
                            local_page.path.display()
                        ));
                        summary.pushed += 1;
                    } else {
                        match self.push_body(id, &remote_page, &local_page.body).await? {
                            true => summary.pushed += 1,
                            false => summary.record_failure(id.clone(), "push failed"),
                        }
                    }
                }
                TieBreak::Pull => {
                    tracing::debug!(page_id = %id, class = ?Classification::NewRemote, "classified");
                    if dry_run {
                        summary.plan.push(format!(
                            "pull {} (first seen on both sides)",
                            local_page.path.display()
                        ));
                        summary.pulled += 1;
                    } else {
                        match self.write_local(&local_page.path, &remote_page.body, id) {
                            Ok(()) => summary.pulled += 1,
                            Err(e) => summary.record_failure(id.clone(), e.to_string()),
                        }
                    }
                }
            }
        }

        // New remote pages become new local files.
        for id in &new_remote {
            tracing::debug!(page_id = %id, class = ?Classification::NewRemote, "classified");
            let Some(meta) = remote_pages.get(id) else { continue };
            let remote_page = match self.take_fetched(&mut fetched, id, &mut summary)? {
                Some(page) => page,
                None => continue,
            };
            if dry_run {
                summary
                    .plan
                    .push(format!("pull new page to {}", meta.relative_path.display()));
                summary.pulled += 1;
                continue;
            }
            tracing::debug!(page_id = %id, parent = ?remote_page.parent_id, "pulling new page");
            if let Err(e) = self.write_local(&meta.relative_path, &remote_page.body, id) {
                summary.record_failure(id.clone(), e.to_string());
                continue;
            }
            scan.pages.insert(
                id.clone(),
                LocalPage {
                    path: meta.relative_path.clone(),
                    page_id: Some(id.clone()),
                    body: remote_page.body.clone(),
                    modified: None,
                },
            );
            summary.pulled += 1;
        }

        // Local files the remote has never seen. The remote contract has no
        // create operation, so these are surfaced rather than synced.
        for id in detector::new_local_ids(&tracked, &scan.pages, &remote_pages) {
            tracing::debug!(page_id = %id, class = ?Classification::NewLocal, "classified");
            let path = scan.pages[&id].path.clone();
            if dry_run {
                summary.plan.push(format!(
                    "new local page {} (creation not supported by the remote contract)",
                    path.display()
                ));
            } else {
                tracing::warn!(page_id = %id, path = %path.display(),
                    "local page unknown to the remote; creation is not part of the remote contract");
            }
        }
        for page in &scan.untracked {
            if dry_run {
                summary.plan.push(format!(
                    "new local file {} (no page id yet)",
                    page.path.display()
                ));
            } else {
                tracing::info!(path = %page.path.display(),
                    "file has no page id; it will gain front-matter after its first successful push");
            }
        }

        // Next tracked map: whatever now exists locally with an identity,
        // plus entries whose remote deletion failed (retried next cycle).
        let mut next_tracked: BTreeMap<PageId, PathBuf> = BTreeMap::new();
        for (id, page) in &scan.pages {
            next_tracked.insert(id.clone(), page.path.clone());
        }
        for id in &failed_remote_deletes {
            if let Some(path) = tracked.get(id) {
                next_tracked.insert(id.clone(), path.clone());
            }
        }

        // Phase: baseline refresh for everything that synced cleanly.
        if !dry_run {
            let failed_ids: HashSet<&PageId> = summary.failures.iter().map(|(id, _)| id).collect();
            let refresh: BTreeMap<PageId, PathBuf> = next_tracked
                .iter()
                .filter(|(id, _)| !conflicted_ids.contains(*id) && !failed_ids.contains(id))
                .map(|(id, path)| (id.clone(), path.clone()))
                .collect();
            self.baseline.bulk_refresh(&refresh, &self.binding.local_path);
        }


        Ok(CycleResult {
            summary,
            tracked: if dry_run { tracked } else { next_tracked },
        })
    }

    async fn run_force_push(&self, scan: &LocalScan) -> Result<CycleResult, SyncError> {
        let mut summary = SyncSummary::default();
        let mut next_tracked = BTreeMap::new();

        let mut ids: Vec<&PageId> = scan.pages.keys().collect();
        ids.sort();

        for id in ids {
            let page = &scan.pages[id];
            let snapshot = match self.remote.get_page(id).await {
                Ok(snapshot) => snapshot,
                Err(e) if is_abortive(&e) => return Err(e.into()),
                Err(e) => {
                    summary.record_failure(id.clone(), e.to_string());
                    continue;
                }
            };

            match self.push_body(id, &snapshot, &page.body).await? {
                true => {
                    summary.pushed += 1;
                    next_tracked.insert(id.clone(), page.path.clone());
                }
                false => summary.record_failure(id.clone(), "force push failed"),
            }
        }

        self.baseline
            .bulk_refresh(&next_tracked, &self.binding.local_path);

        Ok(CycleResult {
            summary,
            tracked: next_tracked,
        })
    }

    async fn run_force_pull(
        &self,
        scan: &LocalScan,
        remote_pages: &HashMap<PageId, RemotePageMeta>,
    ) -> Result<CycleResult, SyncError> {
        let mut summary = SyncSummary::default();
        let mut next_tracked = BTreeMap::new();

        // A forced pull must reflect the remote exactly as it is right now.
        self.cache.clear_all();

        let metas: Vec<RemotePageMeta> = {
            let mut metas: Vec<_> = remote_pages.values().cloned().collect();
            metas.sort_by(|a, b| a.id.cmp(&b.id));
            metas
        };
        let mut fetched = self.fetch_pages(metas.clone()).await;

        for meta in &metas {
            let remote_page = match self.take_fetched(&mut fetched, &meta.id, &mut summary)? {
                Some(page) => page,
                None => continue,
            };

            // keep an existing file where it is; new pages land at the
            // hierarchy-derived path
            let target = scan
                .pages
                .get(&meta.id)
                .map(|p| p.path.clone())
                .unwrap_or_else(|| meta.relative_path.clone());

            match self.write_local(&target, &remote_page.body, &meta.id) {
                Ok(()) => {
                    summary.pulled += 1;
                    next_tracked.insert(meta.id.clone(), target);
                }
                Err(e) => summary.record_failure(meta.id.clone(), e.to_string()),
            }
        }

        self.baseline
            .bulk_refresh(&next_tracked, &self.binding.local_path);

        Ok(CycleResult {
            summary,
            tracked: next_tracked,
        })
    }

    /// Fetch full snapshots for the given pages over the bounded worker
    /// pool, serving from the version cache where timestamps still match.
    async fn fetch_pages(
        &self,
        metas: Vec<RemotePageMeta>,
    ) -> HashMap<PageId, Result<RemotePage, RemoteError>> {
        let semaphore = Arc::new(Semaphore::new(self.fetch_workers));
        let mut join_set: JoinSet<(PageId, Result<RemotePage, RemoteError>)> = JoinSet::new();

        for meta in metas {
            let remote = Arc::clone(&self.remote);
            let cache = Arc::clone(&self.cache);
            let converter = Arc::clone(&self.converter);
            let semaphore = Arc::clone(&semaphore);
            let space_key = self.binding.space_key.clone();

            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (
                        meta.id.clone(),
                        Err(RemoteError::Protocol("fetch pool closed".into())),
                    );
                };

                if let Some(storage) = cache.get(&meta.id, meta.version, meta.modified) {
                    match converter.storage_to_markdown(&storage) {
                        Ok(body) => {
                            return (
                                meta.id.clone(),
                                Ok(RemotePage {
                                    id: meta.id.clone(),
                                    title: meta.title.clone(),
                                    parent_id: meta.parent_id.clone(),
                                    storage,
                                    body,
                                    version: meta.version,
                                    modified: meta.modified,
                                    space_key,
                                }),
                            );
                        }
                        Err(e) => {
                            tracing::warn!(page_id = %meta.id, error = %e,
                                "cached body unusable, fetching fresh");
                        }
                    }
                }

                let result = remote.get_page(&meta.id).await;
                if let Ok(page) = &result {
                    cache.put(&page.id, page.version, &page.storage, page.modified);
                }
                (meta.id, result)
            });
        }

        let mut out = HashMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((id, result)) => {
                    out.insert(id, result);
                }
                Err(e) => tracing::error!(error = %e, "fetch worker panicked"),
            }
        }
        out
    }

    /// Pull one fetched snapshot out of the result map. Auth and
    /// reachability failures abort the cycle; narrower errors are recorded
    /// per page and yield None.
    fn take_fetched(
        &self,
        fetched: &mut HashMap<PageId, Result<RemotePage, RemoteError>>,
        id: &PageId,
        summary: &mut SyncSummary,
    ) -> Result<Option<RemotePage>, SyncError> {
        match fetched.remove(id) {
            Some(Ok(page)) => Ok(Some(page)),
            Some(Err(e)) if is_abortive(&e) => Err(e.into()),
            Some(Err(e)) => {
                tracing::debug!(page_id = %id, class = ?Classification::Error, "classified");
                summary.record_failure(id.clone(), e.to_string());
                Ok(None)
            }
            None => {
                summary.record_failure(id.clone(), "page was not fetched");
                Ok(None)
            }
        }
    }

    /// Push a body with the conditional update, retrying once on a version
    /// conflict after refetching the current version. Returns whether the
    /// push landed; abortive failures bubble as errors.
    async fn push_body(
        &self,
        id: &PageId,
        snapshot: &RemotePage,
        body: &str,
    ) -> Result<bool, SyncError> {
        tracing::debug!(
            page_id = %id,
            space = %snapshot.space_key,
            version = snapshot.version,
            "pushing conditional update"
        );
        let storage = match self.converter.markdown_to_storage(body) {
            Ok(storage) => storage,
            Err(e) => {
                tracing::error!(page_id = %id, error = %e, "conversion to storage form failed");
                return Ok(false);
            }
        };

        match self
            .remote
            .update_page(id, &snapshot.title, &storage, snapshot.version)
            .await
        {
            Ok(updated) => {
                self.cache
                    .put(id, updated.version, &updated.storage, updated.modified);
                return Ok(true);
            }
            Err(RemoteError::VersionConflict { .. }) => {
                tracing::warn!(page_id = %id, "version conflict on push, refetching and retrying once");
            }
            Err(e) if is_abortive(&e) => return Err(e.into()),
            Err(e) => {
                tracing::error!(page_id = %id, error = %e, "push failed");
                return Ok(false);
            }
        }

        // brief jittered pause so we do not race whoever just bumped the page
        let pause: u64 = rand::rng().random_range(100..400);
        tokio::time::sleep(std::time::Duration::from_millis(pause)).await;

        let fresh = match self.remote.get_page(id).await {
            Ok(fresh) => fresh,
            Err(e) if is_abortive(&e) => return Err(e.into()),
            Err(e) => {
                tracing::error!(page_id = %id, error = %e, "refetch after version conflict failed");
                return Ok(false);
            }
        };

        match self
            .remote
            .update_page(id, &fresh.title, &storage, fresh.version)
            .await
        {
            Ok(updated) => {
                self.cache
                    .put(id, updated.version, &updated.storage, updated.modified);
                Ok(true)
            }
            Err(e) if is_abortive(&e) => Err(e.into()),
            Err(e) => {
                tracing::error!(page_id = %id, error = %e, "push retry failed");
                Ok(false)
            }
        }
    }

    /// Write a body to a local file, keeping existing front-matter keys and
    /// stamping the canonical page URL.
    fn write_local(&self, relative: &Path, body: &str, id: &PageId) -> Result<(), SyncError> {
        let abs = self.binding.local_path.join(relative);
        if let Some(parent) = abs.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let url = frontmatter::build_wiki_url(&self.binding.base_url, &self.binding.space_key, id);
        let content = match std::fs::read_to_string(&abs) {
            Ok(existing) => match frontmatter::split_front_matter(&existing) {
                Some((inner, _)) => {
                    frontmatter::rewrite_front_matter(&format!("---\n{inner}\n---\n{body}"), &url)
                }
                None => frontmatter::rewrite_front_matter(body, &url),
            },
            Err(_) => frontmatter::rewrite_front_matter(body, &url),
        };

        std::fs::write(&abs, content)?;
        Ok(())
    }

    /// For a marked merge with a configured and available merge tool, write
    /// the three versions to temp files and let the user resolve. A clean
    /// result replaces the outcome; any tool failure keeps the marked text.
    fn maybe_run_merge_tool(
        &self,
        id: &PageId,
        baseline: &Option<String>,
        local: &LocalPage,
        remote: &RemotePage,
        outcome: crate::merge::MergeOutcome,
    ) -> crate::merge::MergeOutcome {
        let Some(tool) = &self.merge_tool else {
            return outcome;
        };
        if !outcome.has_conflict || !tool.is_available() {
            return outcome;
        }

        let scratch = match tempfile::Builder::new().prefix("wikisync-merge").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                tracing::warn!(error = %e, "cannot create merge scratch dir, keeping markers");
                return outcome;
            }
        };

        let base_path = scratch.path().join("base.md");
        let local_path = scratch.path().join("local.md");
        let remote_path = scratch.path().join("remote.md");
        let output_path = scratch.path().join("merged.md");

        let prepared = std::fs::write(&base_path, baseline.as_deref().unwrap_or(&local.body))
            .and_then(|_| std::fs::write(&local_path, &local.body))
            .and_then(|_| std::fs::write(&remote_path, &remote.body));
        if let Err(e) = prepared {
            tracing::warn!(error = %e, "cannot stage merge files, keeping markers");
            return outcome;
        }

        match tool.launch(&local_path, &base_path, &remote_path, &output_path) {
            Ok(resolved) if !crate::merge::diff3::contains_conflict_markers(&resolved) => {
                tracing::info!(page_id = %id, tool = %tool.name(), "merge tool resolved the conflict");
                crate::merge::MergeOutcome::clean(resolved)
            }
            Ok(_) => {
                tracing::warn!(page_id = %id, "merge tool left markers in place");
                outcome
            }
            Err(e) => {
                tracing::warn!(page_id = %id, error = %e, "merge tool failed, keeping markers");
                outcome
            }
        }
    }
}

fn is_abortive(e: &RemoteError) -> bool {
    matches!(e, RemoteError::AuthFailed(_) | RemoteError::Unreachable(_))
}

/// Collapse a content resolution into the page's cycle classification.
/// A merge counts as a conflict classification whether or not markers
/// survived; it means both sides diverged since the baseline.
fn classification_of(resolution: &Resolution) -> Classification {
    match resolution {
        Resolution::Unchanged | Resolution::Converged => Classification::Unchanged,
        Resolution::PushOnly => Classification::PushOnly,
        Resolution::PullOnly => Classification::PullOnly,
        Resolution::Merged(_) => Classification::Conflict,
    }
}

//! Execution of structural changes: file moves, remote reparents, deletions
//! in both directions.
//!
//! Every operation processes its whole list; a failing entry is logged,
//! recorded, and skipped. Dry-run logs intentions and touches nothing.

use crate::domain::{DeleteInfo, MoveDirection, MoveInfo, PageId};
use crate::error::SyncError;
use crate::parser::frontmatter;
use crate::paths;
use crate::remote::PageOperations;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Per-operation outcome: which entries landed, which did not and why.
#[derive(Debug, Default)]
pub struct OpReport {
    pub succeeded: Vec<PageId>,
    pub failed: Vec<(PageId, String)>,
}

pub struct MoveDeleteHandler {
    remote: Arc<dyn PageOperations>,
    local_root: PathBuf,
}

impl MoveDeleteHandler {
    pub fn new(remote: Arc<dyn PageOperations>, local_root: impl Into<PathBuf>) -> Self {
        Self {
            remote,
            local_root: local_root.into(),
        }
    }

    /// Relocate local files to match remote hierarchy changes.
    pub fn move_local_files(&self, moves: &[MoveInfo], dry_run: bool) -> OpReport {
        let mut report = OpReport::default();

        for mv in moves {
            if mv.direction != MoveDirection::RemoteToLocal {
                tracing::warn!(page_id = %mv.page_id, "wrong direction for a local file move, skipping");
                continue;
            }

            let old_abs = self.local_root.join(&mv.old_path);
            let new_abs = self.local_root.join(&mv.new_path);

            if !old_abs.exists() {
                report.failed.push((
                    mv.page_id.clone(),
                    format!("source {} does not exist", old_abs.display()),
                ));
                continue;
            }
            if new_abs.exists() {
                report.failed.push((
                    mv.page_id.clone(),
                    format!("target {} already exists", new_abs.display()),
                ));
                continue;
            }

            if dry_run {
                tracing::info!(
                    page_id = %mv.page_id,
                    from = %mv.old_path.display(),
                    to = %mv.new_path.display(),
                    "[dry-run] would move local file"
                );
                report.succeeded.push(mv.page_id.clone());
                continue;
            }

            let result = (|| -> std::io::Result<()> {
                if let Some(parent) = new_abs.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::rename(&old_abs, &new_abs)?;
                Ok(())
            })();

            match result {
                Ok(()) => {
                    tracing::info!(
                        page_id = %mv.page_id,
                        from = %mv.old_path.display(),
                        to = %mv.new_path.display(),
                        "moved local file"
                    );
                    if let Some(old_dir) = old_abs.parent() {
                        paths::prune_empty_dirs(old_dir, &self.local_root);
                    }
                    report.succeeded.push(mv.page_id.clone());
                }
                Err(e) => {
                    tracing::error!(page_id = %mv.page_id, error = %e, "failed to move local file");
                    report.failed.push((mv.page_id.clone(), e.to_string()));
                }
            }
        }

        report
    }

    /// Update remote parents to match local folder moves.
    pub async fn reparent_remote_pages(&self, moves: &[MoveInfo], dry_run: bool) -> OpReport {
        let mut report = OpReport::default();

        for mv in moves {
            if mv.direction != MoveDirection::LocalToRemote {
                tracing::warn!(page_id = %mv.page_id, "wrong direction for a reparent, skipping");
                continue;
            }

            let parent = match self.resolve_parent_page_id(&mv.new_path) {
                Ok(parent) => parent,
                Err(e) => {
                    tracing::error!(page_id = %mv.page_id, error = %e, "cannot resolve new parent");
                    report.failed.push((mv.page_id.clone(), e.to_string()));
                    continue;
                }
            };

            let parent_display = parent
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "(space root)".to_string());

            if dry_run {
                tracing::info!(
                    page_id = %mv.page_id,
                    title = %mv.title,
                    parent = %parent_display,
                    "[dry-run] would reparent remote page"
                );
                report.succeeded.push(mv.page_id.clone());
                continue;
            }

            match self.remote.reparent(&mv.page_id, parent.as_ref()).await {
                Ok(()) => {
                    tracing::info!(
                        page_id = %mv.page_id,
                        title = %mv.title,
                        parent = %parent_display,
                        "reparented remote page"
                    );
                    report.succeeded.push(mv.page_id.clone());
                }
                Err(e) => {
                    tracing::error!(page_id = %mv.page_id, error = %e, "failed to reparent remote page");
                    report.failed.push((mv.page_id.clone(), e.to_string()));
                }
            }
        }

        report
    }

    /// Delete local files for pages that disappeared remotely.
    pub fn delete_local_files(&self, deletes: &[DeleteInfo], dry_run: bool) -> OpReport {
        let mut report = OpReport::default();

        for del in deletes {
            let abs = self.local_root.join(&del.path);

            if dry_run {
                tracing::info!(page_id = %del.page_id, path = %del.path.display(),
                    "[dry-run] would delete local file");
                report.succeeded.push(del.page_id.clone());
                continue;
            }

            match std::fs::remove_file(&abs) {
                Ok(()) => {
                    tracing::info!(page_id = %del.page_id, path = %del.path.display(), "deleted local file");
                    if let Some(dir) = abs.parent() {
                        paths::prune_empty_dirs(dir, &self.local_root);
                    }
                    report.succeeded.push(del.page_id.clone());
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // already gone, which is the state we wanted
                    report.succeeded.push(del.page_id.clone());
                }
                Err(e) => {
                    tracing::error!(page_id = %del.page_id, error = %e, "failed to delete local file");
                    report.failed.push((del.page_id.clone(), e.to_string()));
                }
            }
        }

        report
    }

    /// Delete remote pages for files that disappeared locally.
    pub async fn delete_remote_pages(&self, deletes: &[DeleteInfo], dry_run: bool) -> OpReport {
        let mut report = OpReport::default();

        for del in deletes {
            if dry_run {
                tracing::info!(page_id = %del.page_id, "[dry-run] would delete remote page");
                report.succeeded.push(del.page_id.clone());
                continue;
            }

            match self.remote.delete(&del.page_id).await {
                Ok(()) => {
                    tracing::info!(page_id = %del.page_id, "deleted remote page");
                    report.succeeded.push(del.page_id.clone());
                }
                Err(crate::error::RemoteError::NotFound(_)) => {
                    // deleted by someone else in the meantime; same end state
                    report.succeeded.push(del.page_id.clone());
                }
                Err(e) => {
                    tracing::error!(page_id = %del.page_id, error = %e, "failed to delete remote page");
                    report.failed.push((del.page_id.clone(), e.to_string()));
                }
            }
        }

        report
    }

    /// The parent of `docs/section/page.md` is whatever page lives in
    /// `docs/section.md`; a file with no parent folder sits at the space
    /// root. A peer file that exists but carries no id is a configuration
    /// error for this entry — guessing a parent would scramble the tree.
    pub fn resolve_parent_page_id(&self, new_path: &Path) -> Result<Option<PageId>, SyncError> {
        let Some(parent_dir) = new_path.parent() else {
            return Ok(None);
        };
        if parent_dir.as_os_str().is_empty() {
            return Ok(None);
        }

        let Some(dir_name) = parent_dir.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };
        let peer_rel = parent_dir
            .parent()
            .map(|gp| gp.join(format!("{dir_name}.md")))
            .unwrap_or_else(|| PathBuf::from(format!("{dir_name}.md")));
        let peer_abs = self.local_root.join(&peer_rel);

        if !peer_abs.exists() {
            tracing::debug!(
                path = %new_path.display(),
                peer = %peer_rel.display(),
                "no parent peer file, treating as space root"
            );
            return Ok(None);
        }

        let content = std::fs::read_to_string(&peer_abs)?;
        match frontmatter::page_id_of(&content) {
            Some(id) => Ok(Some(id)),
            None => Err(SyncError::Config(format!(
                "parent page file {} has no page id in its front-matter",
                peer_rel.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MoveDirection, RemotePage};
    use crate::error::RemoteError;
    use crate::remote::RemoteTreeNode;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    // fakes just enough of the remote to observe reparent/delete calls
    #[derive(Default)]
    struct RecordingRemote {
        pub reparents: Mutex<Vec<(PageId, Option<PageId>)>>,
        pub deletes: Mutex<Vec<PageId>>,
        pub fail_delete: Mutex<HashSet<PageId>>,
    }

    #[async_trait]
    impl PageOperations for RecordingRemote {
        async fn get_page(&self, id: &PageId) -> Result<RemotePage, RemoteError> {
            Err(RemoteError::NotFound(id.clone()))
        }

        async fn update_page(
            &self,
            id: &PageId,
            _title: &str,
            _storage: &str,
            _version: i64,
        ) -> Result<RemotePage, RemoteError> {
            Err(RemoteError::NotFound(id.clone()))
        }

        async fn reparent(
            &self,
            id: &PageId,
            new_parent: Option<&PageId>,
        ) -> Result<(), RemoteError> {
            self.reparents
                .lock()
                .unwrap()
                .push((id.clone(), new_parent.cloned()));
            Ok(())
        }

        async fn delete(&self, id: &PageId) -> Result<(), RemoteError> {
            if self.fail_delete.lock().unwrap().contains(id) {
                return Err(RemoteError::AccessDenied("locked".into()));
            }
            self.deletes.lock().unwrap().push(id.clone());
            Ok(())
        }

        async fn list_descendants(
            &self,
            root: &PageId,
            _space_key: &str,
            _limit: usize,
            _exclusions: &HashSet<PageId>,
        ) -> Result<RemoteTreeNode, RemoteError> {
            Err(RemoteError::NotFound(root.clone()))
        }
    }

    fn mv(id: &str, old: &str, new: &str, direction: MoveDirection) -> MoveInfo {
        MoveInfo {
            page_id: PageId::new(id),
            title: format!("Page {id}"),
            old_path: PathBuf::from(old),
            new_path: PathBuf::from(new),
            direction,
        }
    }

    #[test]
    fn local_move_creates_dirs_and_prunes_empties() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("docs/old")).unwrap();
        std::fs::write(root.join("docs/old/page.md"), "content").unwrap();

        let handler = MoveDeleteHandler::new(Arc::new(RecordingRemote::default()), root);
        let report = handler.move_local_files(
            &[mv("1", "docs/old/page.md", "docs/new/page.md", MoveDirection::RemoteToLocal)],
            false,
        );

        assert_eq!(report.succeeded.len(), 1);
        assert!(root.join("docs/new/page.md").exists());
        assert!(!root.join("docs/old").exists(), "empty source dir pruned");
        assert!(root.join("docs").exists(), "non-empty ancestor kept");
    }

    #[test]
    fn local_move_refuses_to_clobber_target() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("a")).unwrap();
        std::fs::write(root.join("a/x.md"), "one").unwrap();
        std::fs::write(root.join("taken.md"), "two").unwrap();

        let handler = MoveDeleteHandler::new(Arc::new(RecordingRemote::default()), root);
        let report =
            handler.move_local_files(&[mv("1", "a/x.md", "taken.md", MoveDirection::RemoteToLocal)], false);

        assert!(report.succeeded.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(std::fs::read_to_string(root.join("taken.md")).unwrap(), "two");
    }

    #[test]
    fn one_bad_move_does_not_stop_the_rest() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::write(root.join("good.md"), "x").unwrap();

        let handler = MoveDeleteHandler::new(Arc::new(RecordingRemote::default()), root);
        let report = handler.move_local_files(
            &[
                mv("1", "missing.md", "elsewhere.md", MoveDirection::RemoteToLocal),
                mv("2", "good.md", "moved.md", MoveDirection::RemoteToLocal),
            ],
            false,
        );

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.succeeded, vec![PageId::new("2")]);
        assert!(root.join("moved.md").exists());
    }

    #[test]
    fn dry_run_moves_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::write(root.join("page.md"), "x").unwrap();

        let handler = MoveDeleteHandler::new(Arc::new(RecordingRemote::default()), root);
        let report =
            handler.move_local_files(&[mv("1", "page.md", "new.md", MoveDirection::RemoteToLocal)], true);

        assert_eq!(report.succeeded.len(), 1);
        assert!(root.join("page.md").exists());
        assert!(!root.join("new.md").exists());
    }

    #[tokio::test]
    async fn reparent_resolves_parent_from_peer_file() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("docs/section")).unwrap();
        std::fs::write(
            root.join("docs/section.md"),
            "---\nconfluence_url: https://x/spaces/S/pages/777\n---\nparent\n",
        )
        .unwrap();

        let remote = Arc::new(RecordingRemote::default());
        let handler = MoveDeleteHandler::new(remote.clone(), root);
        let report = handler
            .reparent_remote_pages(
                &[mv("1", "docs/page.md", "docs/section/page.md", MoveDirection::LocalToRemote)],
                false,
            )
            .await;

        assert_eq!(report.succeeded.len(), 1);
        let calls = remote.reparents.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, Some(PageId::new("777")));
    }

    #[tokio::test]
    async fn reparent_to_top_level_means_space_root() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = Arc::new(RecordingRemote::default());
        let handler = MoveDeleteHandler::new(remote.clone(), tmp.path());

        let report = handler
            .reparent_remote_pages(
                &[mv("1", "docs/page.md", "page.md", MoveDirection::LocalToRemote)],
                false,
            )
            .await;

        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(remote.reparents.lock().unwrap()[0].1, None);
    }

    #[tokio::test]
    async fn reparent_fails_when_peer_file_has_no_id() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("section")).unwrap();
        std::fs::write(root.join("section.md"), "# no front matter\n").unwrap();

        let remote = Arc::new(RecordingRemote::default());
        let handler = MoveDeleteHandler::new(remote.clone(), root);
        let report = handler
            .reparent_remote_pages(
                &[mv("1", "page.md", "section/page.md", MoveDirection::LocalToRemote)],
                false,
            )
            .await;

        assert!(report.succeeded.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("no page id"));
        assert!(remote.reparents.lock().unwrap().is_empty());
    }

    #[test]
    fn local_delete_prunes_and_tolerates_already_gone() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("only")).unwrap();
        std::fs::write(root.join("only/page.md"), "x").unwrap();

        let handler = MoveDeleteHandler::new(Arc::new(RecordingRemote::default()), root);
        let report = handler.delete_local_files(
            &[
                DeleteInfo {
                    page_id: PageId::new("1"),
                    path: PathBuf::from("only/page.md"),
                },
                DeleteInfo {
                    page_id: PageId::new("2"),
                    path: PathBuf::from("already-gone.md"),
                },
            ],
            false,
        );

        assert_eq!(report.succeeded.len(), 2);
        assert!(!root.join("only").exists());
    }

    #[tokio::test]
    async fn remote_delete_failures_are_isolated() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = Arc::new(RecordingRemote::default());
        remote.fail_delete.lock().unwrap().insert(PageId::new("1"));

        let handler = MoveDeleteHandler::new(remote.clone(), tmp.path());
        let report = handler
            .delete_remote_pages(
                &[
                    DeleteInfo {
                        page_id: PageId::new("1"),
                        path: PathBuf::from("a.md"),
                    },
                    DeleteInfo {
                        page_id: PageId::new("2"),
                        path: PathBuf::from("b.md"),
                    },
                ],
                false,
            )
            .await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.succeeded, vec![PageId::new("2")]);
        assert_eq!(*remote.deletes.lock().unwrap(), vec![PageId::new("2")]);
    }
}

//! Discovery of the two current sets: local files by scan, remote pages by
//! hierarchy walk.

use crate::domain::{LocalPage, PageId, RemotePageMeta};
use crate::parser::frontmatter;
use crate::paths;
use crate::remote::RemoteTreeNode;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use walkdir::WalkDir;

/// Result of scanning the local root: pages with an identity, and files that
/// have no page id yet (new locals).
#[derive(Debug, Default)]
pub struct LocalScan {
    pub pages: HashMap<PageId, LocalPage>,
    pub untracked: Vec<LocalPage>,
}

/// Walk the local root for markdown files and pull each one's identity out
/// of its front-matter. Broken files are logged and skipped, and a file
/// whose URL points into a different space is not this binding's to sync.
pub fn scan_local_pages(root: &Path, space_key: &str) -> LocalScan {
    let mut scan = LocalScan::default();

    if !root.exists() {
        tracing::warn!(root = %root.display(), "local root does not exist yet");
        return scan;
    }

    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file()
            || entry.path().extension().and_then(|s| s.to_str()) != Some("md")
        {
            continue;
        }

        let path = entry.path();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
                continue;
            }
        };

        let relative = path
            .strip_prefix(root)
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|_| path.to_path_buf());

        let modified = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);

        let parsed = match frontmatter::parse_document(&relative, &content) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(path = %relative.display(), error = %e, "skipping file with bad front-matter");
                continue;
            }
        };

        if let Some(file_space) = parsed.space_key.as_deref() {
            if file_space != space_key {
                tracing::warn!(
                    path = %relative.display(),
                    file_space,
                    "file belongs to a different space, leaving it alone"
                );
                continue;
            }
        }

        let page = LocalPage {
            path: relative,
            page_id: parsed.page_id.clone(),
            body: parsed.body,
            modified,
        };

        match parsed.page_id {
            Some(id) => {
                if let Some(previous) = scan.pages.insert(id.clone(), page) {
                    tracing::warn!(
                        page_id = %id,
                        kept = %scan.pages[&id].path.display(),
                        dropped = %previous.path.display(),
                        "two files claim the same page id, keeping the later one"
                    );
                }
            }
            None => scan.untracked.push(page),
        }
    }

    tracing::info!(
        tracked = scan.pages.len(),
        untracked = scan.untracked.len(),
        "local scan complete"
    );
    scan
}

/// Flatten the remote hierarchy into `id → metadata` with each page's target
/// local path derived from its ancestor chain of titles. With `exclude_root`
/// the root page itself is omitted and its children sit at the top level.
pub fn flatten_hierarchy(
    root: &RemoteTreeNode,
    exclude_root: bool,
) -> HashMap<PageId, RemotePageMeta> {
    let mut pages = HashMap::new();
    collect(root, &mut Vec::new(), true, exclude_root, &mut pages);
    pages
}

fn collect(
    node: &RemoteTreeNode,
    ancestor_titles: &mut Vec<String>,
    is_root: bool,
    exclude_root: bool,
    pages: &mut HashMap<PageId, RemotePageMeta>,
) {
    let include_this = !(is_root && exclude_root);

    if include_this {
        let titles: Vec<&str> = ancestor_titles.iter().map(|t| t.as_str()).collect();
        pages.insert(
            node.id.clone(),
            RemotePageMeta {
                id: node.id.clone(),
                title: node.title.clone(),
                parent_id: node.parent_id.clone(),
                version: node.version,
                modified: node.modified,
                relative_path: paths::path_from_ancestors(&titles, &node.title),
            },
        );
    }

    // An included node contributes a directory level for its children; an
    // excluded root keeps its children at the current level.
    if include_this {
        ancestor_titles.push(node.title.clone());
    }
    for child in &node.children {
        collect(child, ancestor_titles, false, exclude_root, pages);
    }
    if include_this {
        ancestor_titles.pop();
    }
}

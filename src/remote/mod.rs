pub mod api;

pub use api::RemoteClient;

use crate::domain::{PageId, RemotePage};
use crate::error::RemoteError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// One node of the remote hierarchy as returned by `list_descendants`.
/// Children are nested; the engine flattens this into paths itself so the
/// client stays ignorant of local path policy.
#[derive(Debug, Clone)]
pub struct RemoteTreeNode {
    pub id: PageId,
    pub title: String,
    pub parent_id: Option<PageId>,
    pub version: i64,
    pub modified: DateTime<Utc>,
    pub children: Vec<RemoteTreeNode>,
}

/// The narrow capability surface the engine needs from the remote wiki.
/// Exactly these five operations; handlers never receive a wider object.
#[async_trait]
pub trait PageOperations: Send + Sync {
    /// Full snapshot of one page, both storage and markdown forms.
    async fn get_page(&self, id: &PageId) -> Result<RemotePage, RemoteError>;

    /// Conditional update: fails with `VersionConflict` when `version` no
    /// longer matches the server's current version.
    async fn update_page(
        &self,
        id: &PageId,
        title: &str,
        storage: &str,
        version: i64,
    ) -> Result<RemotePage, RemoteError>;

    /// Move a page under a new parent; `None` means the space root.
    async fn reparent(&self, id: &PageId, new_parent: Option<&PageId>) -> Result<(), RemoteError>;

    /// Delete a page.
    async fn delete(&self, id: &PageId) -> Result<(), RemoteError>;

    /// Walk the hierarchy under `root` (inclusive), skipping excluded ids and
    /// their subtrees, visiting at most `limit` pages.
    async fn list_descendants(
        &self,
        root: &PageId,
        space_key: &str,
        limit: usize,
        exclusions: &HashSet<PageId>,
    ) -> Result<RemoteTreeNode, RemoteError>;
}

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Opaque stable identifier assigned by the remote wiki. Treated as a string
/// everywhere; the remote happens to hand out numeric ids but we never do
/// arithmetic on them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(String);

impl PageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A markdown file discovered under the configured local root.
/// `body` is the text below the front-matter block; `path` is relative to the
/// space's local root so it can be compared against tracked-map entries.
#[derive(Debug, Clone)]
pub struct LocalPage {
    pub path: PathBuf,
    pub page_id: Option<PageId>,
    pub body: String,
    pub modified: Option<DateTime<Utc>>,
}

/// Full snapshot of a remote page: both the document-tree (storage XHTML)
/// form and the canonical markdown form, plus version bookkeeping.
#[derive(Debug, Clone)]
pub struct RemotePage {
    pub id: PageId,
    pub title: String,
    pub parent_id: Option<PageId>,
    pub storage: String,
    pub body: String,
    pub version: i64,
    pub modified: DateTime<Utc>,
    pub space_key: String,
}

/// Lightweight remote metadata gathered while walking the hierarchy.
/// `relative_path` is the local path this page *should* live at, derived from
/// its ancestor chain of titles.
#[derive(Debug, Clone)]
pub struct RemotePageMeta {
    pub id: PageId,
    pub title: String,
    pub parent_id: Option<PageId>,
    pub version: i64,
    pub modified: DateTime<Utc>,
    pub relative_path: PathBuf,
}

/// How a page relates to the previous cycle once both sides have been
/// inspected. The detector produces these; the orchestrator acts on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Unchanged,
    PushOnly,
    PullOnly,
    Conflict,
    DeletedLocally,
    DeletedRemotely,
    MovedLocally,
    MovedRemotely,
    NewLocal,
    NewRemote,
    Error,
}

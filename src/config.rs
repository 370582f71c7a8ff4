//! Configuration and sync-state persistence.
//!
//! Both files live under the hidden `.wikisync/` directory and are YAML.
//! Unknown keys in the config survive rewrites so hand-added fields are not
//! clobbered; the state file is engine-owned and written atomically.

use crate::domain::PageId;
use crate::error::SyncError;
use crate::parser::frontmatter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const CONFIG_DIR: &str = ".wikisync";
pub const CONFIG_FILE: &str = ".wikisync/config.yaml";
pub const STATE_FILE: &str = ".wikisync/state.yaml";

fn default_page_limit() -> usize {
    500
}

/// Which side wins when a page shows up on both sides with no tracked
/// history to merge against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieBreak {
    #[default]
    Push,
    Pull,
}

/// One remote space bound to one local directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceBinding {
    pub base_url: String,
    pub space_key: String,
    pub root_page_id: PageId,
    pub local_path: PathBuf,
    #[serde(default)]
    pub exclude_root: bool,
    #[serde(default)]
    pub exclude_page_ids: Vec<PageId>,
}

impl SpaceBinding {
    /// Hidden directory holding the last-synced body of every tracked page.
    pub fn baseline_dir(&self) -> PathBuf {
        PathBuf::from(CONFIG_DIR).join(format!("{}_baseline", self.space_key))
    }

    /// Hidden directory holding cached remote storage bodies.
    pub fn cache_dir(&self) -> PathBuf {
        PathBuf::from(CONFIG_DIR).join(format!("{}_cache", self.space_key))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub spaces: Vec<SpaceBinding>,
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
    #[serde(default)]
    pub last_synced: Option<DateTime<Utc>>,
    #[serde(default)]
    pub merge_tool: Option<String>,
    #[serde(default)]
    pub merge_tool_command: Option<String>,
    /// Resolution for pages first seen on both sides in the same cycle.
    #[serde(default)]
    pub new_page_tiebreak: TieBreak,
}

impl SyncConfig {
    /// Load and validate. A missing file is a configuration error the caller
    /// turns into the getting-started message.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: SyncConfig = serde_yaml::from_str(&raw)
            .map_err(|e| SyncError::Config(format!("malformed {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.spaces.is_empty() {
            return Err(SyncError::Config("no space bindings configured".into()));
        }
        for space in &self.spaces {
            if space.base_url.is_empty() || !space.base_url.starts_with("http") {
                return Err(SyncError::Config(format!(
                    "space '{}' has an invalid base_url",
                    space.space_key
                )));
            }
            if space.space_key.is_empty() {
                return Err(SyncError::Config("a space binding is missing its key".into()));
            }
            if space.local_path.as_os_str().is_empty() {
                return Err(SyncError::Config(format!(
                    "space '{}' has no local_path",
                    space.space_key
                )));
            }
        }
        if self.page_limit == 0 {
            return Err(SyncError::Config("page_limit must be positive".into()));
        }
        Ok(())
    }

    /// Save, folding unknown top-level keys of an existing file back in so a
    /// rewrite never drops what a user added by hand.
    pub fn save(&self, path: &Path) -> Result<(), SyncError> {
        let mut value = serde_yaml::to_value(self)
            .map_err(|e| SyncError::Config(format!("cannot encode config: {e}")))?;

        if let Ok(existing_raw) = std::fs::read_to_string(path) {
            if let Ok(serde_yaml::Value::Mapping(existing)) =
                serde_yaml::from_str::<serde_yaml::Value>(&existing_raw)
            {
                if let serde_yaml::Value::Mapping(ref mut new_map) = value {
                    for (key, old_value) in existing {
                        new_map.entry(key).or_insert(old_value);
                    }
                }
            }
        }

        let rendered = serde_yaml::to_string(&value)
            .map_err(|e| SyncError::Config(format!("cannot encode config: {e}")))?;
        write_atomic(path, &rendered)
    }

    /// Build a fresh configuration from a wiki page URL, used by `--init`.
    pub fn from_init(local_path: &Path, url: &str, exclude_root: bool) -> Result<Self, SyncError> {
        let (space_key, page_id) = frontmatter::parse_wiki_url(url).ok_or_else(|| {
            SyncError::Config(format!(
                "URL does not look like a wiki page: {url} (expected .../spaces/<KEY>/pages/<id>)"
            ))
        })?;
        let base_url = frontmatter::base_url_of(url)
            .ok_or_else(|| SyncError::Config(format!("cannot derive base URL from {url}")))?;

        Ok(Self {
            spaces: vec![SpaceBinding {
                base_url,
                space_key,
                root_page_id: PageId::new(page_id),
                local_path: local_path.to_path_buf(),
                exclude_root,
                exclude_page_ids: Vec::new(),
            }],
            page_limit: default_page_limit(),
            last_synced: None,
            merge_tool: None,
            merge_tool_command: None,
            new_page_tiebreak: TieBreak::default(),
        })
    }

    /// Merge additional exclusion ids into every binding, sorted and
    /// deduplicated. Returns how many ids were new anywhere.
    pub fn add_exclusions(&mut self, ids: &[PageId]) -> usize {
        let mut added = 0;
        for space in &mut self.spaces {
            for id in ids {
                if !space.exclude_page_ids.contains(id) {
                    space.exclude_page_ids.push(id.clone());
                    added += 1;
                }
            }
            space.exclude_page_ids.sort();
            space.exclude_page_ids.dedup();
        }
        added
    }
}

/// What the previous cycle left behind: when it ran and which pages existed,
/// as `PageId → relative path`. Everything deletion and move detection knows
/// comes from here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub last_synced: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tracked_pages: BTreeMap<PageId, PathBuf>,
}

impl SyncState {
    /// A missing state file means "never synced", not an error.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_yaml::from_str(&raw)
                .map_err(|e| SyncError::Config(format!("malformed {}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(SyncError::Config(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SyncError> {
        let rendered = serde_yaml::to_string(self)
            .map_err(|e| SyncError::Config(format!("cannot encode state: {e}")))?;
        write_atomic(path, &rendered)
    }
}

/// Temp-file-plus-rename so an observer never reads a torn YAML document.
fn write_atomic(path: &Path, content: &str) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| SyncError::Config(format!("cannot create {}: {e}", parent.display())))?;
    }
    let tmp = path.with_extension("yaml.tmp");
    let write = || -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    };
    write().map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        SyncError::Config(format!("cannot write {}: {e}", path.display()))
    })
}

use std::path::{Path, PathBuf};

/// Convert a page title into a filesafe file-name segment.
/// Lowercase, spaces collapse to single hyphens, characters that are unsafe
/// on common filesystems are stripped. Deterministic, so path equality can be
/// used for move detection.
pub fn title_to_segment(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_was_hyphen = false;

    for ch in title.trim().chars() {
        let mapped = match ch {
            ' ' | '\t' => Some('-'),
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '#' | '%' => None,
            c => Some(c.to_ascii_lowercase()),
        };

        match mapped {
            Some('-') => {
                if !last_was_hyphen && !out.is_empty() {
                    out.push('-');
                    last_was_hyphen = true;
                }
            }
            Some(c) => {
                out.push(c);
                last_was_hyphen = false;
            }
            None => {}
        }
    }

    // A title of nothing but stripped characters still needs a name.
    let trimmed = out.trim_matches('-').to_string();
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed
    }
}

/// File name for a page title: filesafe segment plus the markdown extension.
pub fn title_to_filename(title: &str) -> String {
    format!("{}.md", title_to_segment(title))
}

/// Build the local path for a page from its ancestor chain of titles
/// (root first, page itself last). Each ancestor contributes a directory
/// named after its filesafe segment; the page itself becomes `<segment>.md`.
pub fn path_from_ancestors(ancestor_titles: &[&str], title: &str) -> PathBuf {
    let mut path = PathBuf::new();
    for ancestor in ancestor_titles {
        path.push(title_to_segment(ancestor));
    }
    path.push(title_to_filename(title));
    path
}

/// Remove empty directories upward from `dir`, stopping at (and never
/// removing) `root`. Used after local moves and deletes so abandoned folders
/// do not linger.
pub fn prune_empty_dirs(dir: &Path, root: &Path) {
    let mut current = dir.to_path_buf();

    while current.starts_with(root) && current != root {
        if !current.is_dir() {
            return;
        }
        let is_empty = match std::fs::read_dir(&current) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => return,
        };
        if !is_empty {
            return;
        }
        if std::fs::remove_dir(&current).is_err() {
            return;
        }
        tracing::debug!(dir = %current.display(), "pruned empty directory");
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_become_lowercase_hyphenated_segments() {
        assert_eq!(title_to_segment("Getting Started"), "getting-started");
        assert_eq!(title_to_segment("API  Reference"), "api-reference");
        assert_eq!(title_to_segment("  Release Notes "), "release-notes");
    }

    #[test]
    fn reserved_characters_are_stripped() {
        assert_eq!(title_to_segment("Q3: Roadmap?"), "q3-roadmap");
        assert_eq!(title_to_segment("A/B Testing"), "ab-testing");
        assert_eq!(title_to_segment("50% Faster"), "50-faster");
    }

    #[test]
    fn degenerate_titles_still_produce_a_name() {
        assert_eq!(title_to_segment("???"), "untitled");
        assert_eq!(title_to_filename("???"), "untitled.md");
    }

    #[test]
    fn ancestor_chain_builds_nested_path() {
        let path = path_from_ancestors(&["Docs", "User Guide"], "Install Steps");
        assert_eq!(path, PathBuf::from("docs/user-guide/install-steps.md"));
    }

    #[test]
    fn mapping_is_deterministic() {
        let a = path_from_ancestors(&["Team Space"], "Glossary");
        let b = path_from_ancestors(&["Team Space"], "Glossary");
        assert_eq!(a, b);
    }

    #[test]
    fn prune_stops_at_root_and_nonempty_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let deep = root.join("a/b/c");
        std::fs::create_dir_all(&deep).unwrap();
        std::fs::write(root.join("a/keep.md"), "x").unwrap();

        prune_empty_dirs(&deep, root);

        // c and b are empty and vanish; a still holds keep.md; root survives.
        assert!(!root.join("a/b").exists());
        assert!(root.join("a").exists());
        assert!(root.exists());
    }
}

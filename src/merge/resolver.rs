//! Three-way resolution of a single page.
//!
//! Given baseline (last-synced), local, and remote bodies, decide whether
//! anything changed at all, which direction it changed in, or whether a real
//! merge is needed. Merging is table-aware: prose regions go through the line
//! merge, table regions through the cell-level merge.

use crate::merge::diff3::merge3;
use crate::merge::table::{find_tables, merge_tables};
use crate::merge::MergeOutcome;

/// What should happen to a page once all three bodies are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Neither side diverged from the baseline.
    Unchanged,
    /// Only the local side changed; push it.
    PushOnly,
    /// Only the remote side changed; pull it.
    PullOnly,
    /// Both sides changed but ended up identical; just refresh the baseline.
    Converged,
    /// Both sides diverged; carry the merge result.
    Merged(MergeOutcome),
}

/// Classify and, when necessary, merge. A missing baseline (page tracked for
/// the first time this cycle) substitutes the local body as pseudo-baseline,
/// degrading to a two-way merge that keeps remote edits without inventing a
/// false common ancestor.
pub fn resolve(baseline: Option<&str>, local: &str, remote: &str) -> Resolution {
    let Some(base) = baseline else {
        if local == remote {
            return Resolution::Converged;
        }
        return Resolution::Merged(merge_with_table_awareness(local, local, remote));
    };

    match (local != base, remote != base) {
        (false, false) => Resolution::Unchanged,
        (true, false) => Resolution::PushOnly,
        (false, true) => Resolution::PullOnly,
        (true, true) if local == remote => Resolution::Converged,
        (true, true) => Resolution::Merged(merge_with_table_awareness(base, local, remote)),
    }
}

/// Merge full documents, dispatching table regions to the cell-level merge.
///
/// The three documents must agree on the number of tables for the regions to
/// align; when they disagree (a table added or removed on one side) the whole
/// document falls back to the plain line merge, which handles insertion and
/// deletion of entire blocks correctly.
pub fn merge_with_table_awareness(base: &str, local: &str, remote: &str) -> MergeOutcome {
    let base_tables = find_tables(base);
    let local_tables = find_tables(local);
    let remote_tables = find_tables(remote);

    if base_tables.is_empty()
        || base_tables.len() != local_tables.len()
        || base_tables.len() != remote_tables.len()
    {
        tracing::debug!(
            base = base_tables.len(),
            local = local_tables.len(),
            remote = remote_tables.len(),
            "table regions do not align, falling back to line merge"
        );
        return merge3(base, local, remote);
    }

    let base_lines: Vec<&str> = base.split('\n').collect();
    let local_lines: Vec<&str> = local.split('\n').collect();
    let remote_lines: Vec<&str> = remote.split('\n').collect();

    let mut pieces: Vec<String> = Vec::new();
    let mut has_conflict = false;

    let mut base_pos = 0;
    let mut local_pos = 0;
    let mut remote_pos = 0;

    for idx in 0..base_tables.len() {
        let bt = &base_tables[idx];
        let lt = &local_tables[idx];
        let rt = &remote_tables[idx];

        // Prose between the previous region and this table.
        if base_pos < bt.start_line {
            let merged = merge_prose(
                &base_lines[base_pos..bt.start_line],
                &local_lines[local_pos..lt.start_line],
                &remote_lines[remote_pos..rt.start_line],
            );
            has_conflict |= merged.has_conflict;
            if !merged.text.is_empty() {
                pieces.push(merged.text);
            }
        }

        let merged_table = merge_tables(bt, lt, rt);
        has_conflict |= merged_table.has_conflict;
        pieces.push(merged_table.text);

        base_pos = bt.end_line + 1;
        local_pos = lt.end_line + 1;
        remote_pos = rt.end_line + 1;
    }

    // Prose after the last table.
    if base_pos < base_lines.len() {
        let merged = merge_prose(
            &base_lines[base_pos..],
            &local_lines[local_pos.min(local_lines.len())..],
            &remote_lines[remote_pos.min(remote_lines.len())..],
        );
        has_conflict |= merged.has_conflict;
        if !merged.text.is_empty() {
            pieces.push(merged.text);
        }
    }

    MergeOutcome {
        text: pieces.join("\n"),
        has_conflict,
    }
}

fn merge_prose(base: &[&str], local: &[&str], remote: &[&str]) -> MergeOutcome {
    let outcome = merge3(&base.join("\n"), &local.join("\n"), &remote.join("\n"));
    MergeOutcome {
        text: outcome.text.trim_end_matches('\n').to_string(),
        has_conflict: outcome.has_conflict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "# Title\n\nintro text\n\n| 12 | Glossary | Terms |\n| --- | --- | --- |\n| a | b | c |\n\nclosing text";

    #[test]
    fn unchanged_when_both_sides_match_baseline() {
        assert_eq!(resolve(Some(BASE), BASE, BASE), Resolution::Unchanged);
    }

    #[test]
    fn one_sided_changes_classify_as_push_or_pull() {
        let local = BASE.replace("intro", "intro (edited)");
        assert_eq!(resolve(Some(BASE), &local, BASE), Resolution::PushOnly);
        assert_eq!(resolve(Some(BASE), BASE, &local), Resolution::PullOnly);
    }

    #[test]
    fn identical_divergence_converges() {
        let both = BASE.replace("intro", "same edit");
        assert_eq!(resolve(Some(BASE), &both, &both), Resolution::Converged);
    }

    #[test]
    fn different_table_cells_merge_cleanly_across_regions() {
        let local = BASE.replace("| 12 | Glossary | Terms |", "| 12 | Glossary | Terms, abbreviations |");
        let remote = BASE.replace("| 12 | Glossary | Terms |", "| 12 | Glossaries | Terms |");

        let Resolution::Merged(outcome) = resolve(Some(BASE), &local, &remote) else {
            panic!("expected a merge");
        };
        assert!(!outcome.has_conflict);
        assert!(outcome
            .text
            .contains("| 12 | Glossaries | Terms, abbreviations |"));
        assert!(outcome.text.contains("# Title"));
        assert!(outcome.text.contains("closing text"));
    }

    #[test]
    fn prose_edit_and_table_edit_merge_independently() {
        let local = BASE.replace("intro text", "intro text, expanded");
        let remote = BASE.replace("| 12 | Glossary | Terms |", "| 12 | Glossaries | Terms |");

        let Resolution::Merged(outcome) = resolve(Some(BASE), &local, &remote) else {
            panic!("expected a merge");
        };
        assert!(!outcome.has_conflict);
        assert!(outcome.text.contains("intro text, expanded"));
        assert!(outcome.text.contains("| 12 | Glossaries | Terms |"));
    }

    #[test]
    fn table_count_mismatch_falls_back_to_line_merge() {
        // local deletes the table entirely, remote edits prose
        let local = "# Title\n\nintro text\n\nclosing text".to_string();
        let remote = BASE.replace("closing text", "closing text (edited)");

        let Resolution::Merged(outcome) = resolve(Some(BASE), &local, &remote) else {
            panic!("expected a merge");
        };
        // both edits land; the fallback line merge handles block deletion
        assert!(outcome.text.contains("closing text (edited)"));
        assert!(!outcome.text.contains("| 12 |"));
        assert!(!outcome.has_conflict);
    }

    #[test]
    fn missing_baseline_keeps_remote_changes() {
        let local = "shared line\n";
        let remote = "shared line\nremote addition\n";
        let Resolution::Merged(outcome) = resolve(None, local, remote) else {
            panic!("expected a merge");
        };
        assert!(!outcome.has_conflict);
        assert!(outcome.text.contains("remote addition"));
    }

    #[test]
    fn two_tables_merge_independently() {
        let base = "first\n\n| A | B |\n| --- | --- |\n| 1 | 2 |\n\nbetween\n\n| C | D |\n| --- | --- |\n| 3 | 4 |\n\nlast";
        let local = base.replace("| 1 | 2 |", "| 1 | 2-local |");
        let remote = base.replace("| 3 | 4 |", "| 3-remote | 4 |");

        let Resolution::Merged(outcome) = resolve(Some(base), &local, &remote) else {
            panic!("expected a merge");
        };
        assert!(!outcome.has_conflict);
        assert!(outcome.text.contains("| 1 | 2-local |"));
        assert!(outcome.text.contains("| 3-remote | 4 |"));
        assert!(outcome.text.contains("between"));
        assert!(outcome.text.contains("last"));
    }

    #[test]
    fn same_cell_conflict_is_marked() {
        let local = BASE.replace("| a | b | c |", "| a | b-local | c |");
        let remote = BASE.replace("| a | b | c |", "| a | b-remote | c |");

        let Resolution::Merged(outcome) = resolve(Some(BASE), &local, &remote) else {
            panic!("expected a merge");
        };
        assert!(outcome.has_conflict);
        assert!(outcome.text.contains("<<<<<<< local"));
        assert!(outcome.text.contains(">>>>>>> remote"));
    }
}

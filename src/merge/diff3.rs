use crate::merge::MergeOutcome;
use diffy::{ConflictStyle, MergeOptions};

pub const CONFLICT_START: &str = "<<<<<<< local";
pub const CONFLICT_MID: &str = "=======";
pub const CONFLICT_END: &str = ">>>>>>> remote";

/// In-process three-way line merge. Non-overlapping edits from both sides are
/// combined; overlapping edits produce `<<<<<<< local` / `=======` /
/// `>>>>>>> remote` regions in the output.
pub fn merge3(base: &str, local: &str, remote: &str) -> MergeOutcome {
    let mut options = MergeOptions::new();
    options.set_conflict_style(ConflictStyle::Merge);

    match options.merge(base, local, remote) {
        Ok(text) => MergeOutcome::clean(text),
        Err(text) => MergeOutcome::conflicted(relabel(&text)),
    }
}

/// The merge library labels conflict regions "ours"/"theirs"; our users think
/// in "local"/"remote", so the markers are rewritten before anything is shown
/// or stored.
fn relabel(text: &str) -> String {
    let had_trailing_newline = text.ends_with('\n');
    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines() {
        lines.push(match line {
            "<<<<<<< ours" => CONFLICT_START,
            ">>>>>>> theirs" => CONFLICT_END,
            other => other,
        });
    }
    let mut out = lines.join("\n");
    if had_trailing_newline {
        out.push('\n');
    }
    out
}

/// True if the text still carries an unresolved conflict region.
pub fn contains_conflict_markers(text: &str) -> bool {
    text.lines().any(|line| line.starts_with(CONFLICT_START))
}

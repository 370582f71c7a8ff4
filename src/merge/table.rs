//! Cell-granular three-way merge for markdown tables.
//!
//! A line-based merge treats a table row as one line, so edits to different
//! cells of the same row collide. To get around that, each table version is
//! rewritten into a token stream where every cell sits between anchors that
//! encode its coordinates:
//!
//! ```text
//! ROW_0_COL_1_BEGIN
//! Glossaries
//! ROW_0_COL_1_END
//! ```
//!
//! Different cells occupy disjoint line ranges, so the ordinary line merge
//! combines per-cell edits and only a genuine same-cell edit conflicts.

use crate::merge::diff3::{merge3, CONFLICT_END, CONFLICT_MID, CONFLICT_START};
use crate::merge::MergeOutcome;
use std::collections::BTreeMap;

/// Sentinel for newlines embedded inside a cell, so the cell stays a single
/// "line" through the merge.
const NEWLINE_SENTINEL: &str = "__NEWLINE__";

/// Sentinel line carrying the separator row (which contains `|` itself, so it
/// gets a `:::` delimiter instead of anchor framing).
const SEPARATOR_PREFIX: &str = "TABLE_SEP:::";

/// A markdown table located inside a document. Line indices are zero-based
/// and inclusive, relative to the containing document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRegion {
    pub start_line: usize,
    pub end_line: usize,
    pub header: Vec<String>,
    pub separator: String,
    pub rows: Vec<Vec<String>>,
}

/// Parse a bar-delimited table row into trimmed cells.
/// Returns None for anything that is not shaped like `| a | b |`.
pub fn parse_table_row(line: &str) -> Option<Vec<String>> {
    let line = line.trim();
    if !line.starts_with('|') || !line.ends_with('|') || line.len() < 2 {
        return None;
    }

    let parts: Vec<&str> = line.split('|').collect();
    if parts.len() < 3 {
        return None;
    }
    let cells: Vec<String> = parts[1..parts.len() - 1]
        .iter()
        .map(|cell| cell.trim().to_string())
        .collect();

    if cells.is_empty() {
        None
    } else {
        Some(cells)
    }
}

/// A separator row is a table row whose every cell matches `:?-+:?`.
pub fn is_separator_row(line: &str) -> bool {
    let Some(cells) = parse_table_row(line) else {
        return false;
    };
    cells.iter().all(|cell| {
        let mut inner = cell.as_str();
        inner = inner.strip_prefix(':').unwrap_or(inner);
        inner = inner.strip_suffix(':').unwrap_or(inner);
        !inner.is_empty() && inner.chars().all(|c| c == '-')
    })
}

/// Scan a document for markdown tables: a header row immediately followed by
/// a separator row, then data rows with the same column count.
pub fn find_tables(content: &str) -> Vec<TableRegion> {
    let lines: Vec<&str> = content.split('\n').collect();
    let mut tables = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let header = match parse_table_row(lines[i]) {
            Some(cells) if i + 1 < lines.len() && is_separator_row(lines[i + 1]) => cells,
            _ => {
                i += 1;
                continue;
            }
        };

        let separator = lines[i + 1].trim().to_string();
        let mut rows = Vec::new();
        let mut j = i + 2;
        while j < lines.len() {
            match parse_table_row(lines[j]) {
                Some(cells) if cells.len() == header.len() => {
                    rows.push(cells);
                    j += 1;
                }
                _ => break,
            }
        }

        tables.push(TableRegion {
            start_line: i,
            end_line: j - 1,
            header,
            separator,
            rows,
        });
        i = j;
    }

    tables
}

fn escape_cell(content: &str) -> String {
    content.replace('\n', NEWLINE_SENTINEL)
}

fn unescape_cell(content: &str) -> String {
    content.replace(NEWLINE_SENTINEL, "\n")
}

/// Row coordinate in an anchor: the header row or a data row index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum RowKey {
    Header,
    Data(usize),
}

fn anchor(row: RowKey, col: usize, begin: bool) -> String {
    let row_label = match row {
        RowKey::Header => "H".to_string(),
        RowKey::Data(i) => i.to_string(),
    };
    let suffix = if begin { "BEGIN" } else { "END" };
    format!("ROW_{row_label}_COL_{col}_{suffix}")
}

/// Parse an anchor line back into `(row, col, is_begin)`.
fn parse_anchor(line: &str) -> Option<(RowKey, usize, bool)> {
    let rest = line.strip_prefix("ROW_")?;
    let (row_label, rest) = rest.split_once("_COL_")?;
    let (col_str, suffix) = rest.rsplit_once('_')?;

    let row = if row_label == "H" {
        RowKey::Header
    } else {
        RowKey::Data(row_label.parse().ok()?)
    };
    let col: usize = col_str.parse().ok()?;
    let begin = match suffix {
        "BEGIN" => true,
        "END" => false,
        _ => return None,
    };
    Some((row, col, begin))
}

/// Flatten a table into the anchor-wrapped token stream fed to the line
/// merge. Every cell contributes exactly three lines.
fn normalize(table: &TableRegion) -> String {
    let mut lines = Vec::new();

    for (col, cell) in table.header.iter().enumerate() {
        lines.push(anchor(RowKey::Header, col, true));
        lines.push(escape_cell(cell));
        lines.push(anchor(RowKey::Header, col, false));
    }

    lines.push(format!("{SEPARATOR_PREFIX}{}", table.separator));

    for (row, cells) in table.rows.iter().enumerate() {
        for (col, cell) in cells.iter().enumerate() {
            lines.push(anchor(RowKey::Data(row), col, true));
            lines.push(escape_cell(cell));
            lines.push(anchor(RowKey::Data(row), col, false));
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Rebuild a markdown table from a merged anchor stream. Cells the merge
/// dropped come back empty; extra rows added on either side are kept.
/// Returns None when the stream lost its header entirely.
fn denormalize(text: &str) -> Option<String> {
    let mut header: BTreeMap<usize, String> = BTreeMap::new();
    let mut rows: BTreeMap<usize, BTreeMap<usize, String>> = BTreeMap::new();
    let mut separator = String::new();

    let mut current: Option<(RowKey, usize)> = None;
    for line in text.lines() {
        if let Some((row, col, begin)) = parse_anchor(line) {
            current = if begin { Some((row, col)) } else { None };
            continue;
        }
        if let Some(rest) = line.strip_prefix(SEPARATOR_PREFIX) {
            separator = rest.to_string();
            continue;
        }
        if let Some((row, col)) = current {
            let content = unescape_cell(line);
            match row {
                RowKey::Header => {
                    header.insert(col, content);
                }
                RowKey::Data(r) => {
                    rows.entry(r).or_default().insert(col, content);
                }
            }
        }
    }

    if header.is_empty() {
        return None;
    }

    let width = header.keys().max().map(|m| m + 1).unwrap_or(0);
    let render_row = |cells: &BTreeMap<usize, String>| {
        let mut out = Vec::with_capacity(width);
        for col in 0..width {
            out.push(cells.get(&col).cloned().unwrap_or_default());
        }
        format!("| {} |", out.join(" | "))
    };

    let mut lines = Vec::new();
    lines.push(render_row(&header));
    lines.push(separator);
    for cells in rows.values() {
        lines.push(render_row(cells));
    }
    Some(lines.join("\n"))
}

/// Best-effort rendering when conflict markers survived inside the merged
/// stream: keep the markers, drop the anchor noise, and point the user at
/// the affected cell with a `[Row r, Col c]` tag.
fn denormalize_with_conflicts(text: &str) -> String {
    let mut lines = Vec::new();
    let mut in_conflict = false;
    let mut current: Option<(RowKey, usize)> = None;

    for line in text.lines() {
        if line.starts_with(CONFLICT_START) {
            in_conflict = true;
            lines.push(line.to_string());
            // The anchors around a single-cell conflict are context lines, so
            // the affected coordinates are known before the markers appear.
            if let Some((row, col)) = current {
                lines.push(cell_tag(row, col));
            }
        } else if line == CONFLICT_MID && in_conflict {
            lines.push(line.to_string());
        } else if line.starts_with(CONFLICT_END) {
            in_conflict = false;
            lines.push(line.to_string());
        } else if let Some((row, col, begin)) = parse_anchor(line) {
            current = if begin { Some((row, col)) } else { None };
            if begin && in_conflict {
                lines.push(cell_tag(row, col));
            }
        } else if let Some(rest) = line.strip_prefix(SEPARATOR_PREFIX) {
            lines.push(rest.to_string());
        } else if let Some((row, col)) = current {
            if in_conflict {
                lines.push(unescape_cell(line));
            } else {
                lines.push(format!("{} {}", cell_tag(row, col), unescape_cell(line)));
            }
        } else {
            lines.push(unescape_cell(line));
        }
    }

    lines.join("\n")
}

fn cell_tag(row: RowKey, col: usize) -> String {
    match row {
        RowKey::Header => format!("[Row H, Col {col}]"),
        RowKey::Data(r) => format!("[Row {r}, Col {col}]"),
    }
}

/// Cell-level three-way merge of one table region.
pub fn merge_tables(
    base: &TableRegion,
    local: &TableRegion,
    remote: &TableRegion,
) -> MergeOutcome {
    let merged = merge3(&normalize(base), &normalize(local), &normalize(remote));

    if merged.has_conflict {
        tracing::debug!("table merge conflicted at cell level");
        return MergeOutcome::conflicted(denormalize_with_conflicts(&merged.text));
    }

    match denormalize(&merged.text) {
        Some(table) => MergeOutcome::clean(table),
        None => {
            tracing::warn!("failed to rebuild merged table, keeping raw merge output");
            MergeOutcome::conflicted(denormalize_with_conflicts(&merged.text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(content: &str) -> TableRegion {
        let tables = find_tables(content);
        assert_eq!(tables.len(), 1, "expected exactly one table in fixture");
        tables.into_iter().next().unwrap()
    }

    #[test]
    fn recognises_table_shape() {
        let t = table("| Id | Name |\n| --- | --- |\n| 1 | Ada |\n| 2 | Brian |");
        assert_eq!(t.header, vec!["Id", "Name"]);
        assert_eq!(t.separator, "| --- | --- |");
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.start_line, 0);
        assert_eq!(t.end_line, 3);
    }

    #[test]
    fn separator_row_accepts_alignment_colons() {
        assert!(is_separator_row("| :--- | ---: | :---: |"));
        assert!(is_separator_row("|---|---|"));
        assert!(!is_separator_row("| a | b |"));
        assert!(!is_separator_row("| :: | - |"));
    }

    #[test]
    fn rows_with_wrong_column_count_end_the_table() {
        let tables = find_tables("| A | B |\n| --- | --- |\n| 1 | 2 |\n| only-one |\ntext");
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows.len(), 1);
    }

    #[test]
    fn normalise_denormalise_round_trips() {
        let t = table("| Id | Name | Notes |\n| --- | --- | --- |\n| 1 | Ada | first |\n| 2 | Brian | second |");
        let rebuilt = denormalize(&normalize(&t)).unwrap();
        let rt = table(&rebuilt);
        assert_eq!(rt.header, t.header);
        assert_eq!(rt.separator, t.separator);
        assert_eq!(rt.rows, t.rows);
    }

    #[test]
    fn embedded_newlines_survive_the_round_trip() {
        let t = TableRegion {
            start_line: 0,
            end_line: 2,
            header: vec!["K".into(), "V".into()],
            separator: "| --- | --- |".into(),
            rows: vec![vec!["a".into(), "line1\nline2".into()]],
        };
        let rebuilt = denormalize(&normalize(&t)).unwrap();
        assert!(rebuilt.contains("line1\nline2"));
    }

    #[test]
    fn different_cells_of_same_row_auto_merge() {
        let base = table("| 12 | Glossary | Terms |\n| --- | --- | --- |\n| x | y | z |");
        let mut local = base.clone();
        local.header[2] = "Terms, abbreviations".into();
        let mut remote = base.clone();
        remote.header[1] = "Glossaries".into();

        let outcome = merge_tables(&base, &local, &remote);
        assert!(!outcome.has_conflict);
        assert!(outcome
            .text
            .contains("| 12 | Glossaries | Terms, abbreviations |"));
    }

    #[test]
    fn same_cell_edits_conflict_with_cell_coordinates() {
        let base = table("| A |\n| --- |\n| v |");
        let mut local = base.clone();
        local.rows[0][0] = "A-local".into();
        let mut remote = base.clone();
        remote.rows[0][0] = "A-remote".into();

        let outcome = merge_tables(&base, &local, &remote);
        assert!(outcome.has_conflict);
        assert!(outcome.text.contains("A-local"));
        assert!(outcome.text.contains("A-remote"));
        assert!(outcome.text.contains("[Row 0, Col 0]"));
    }

    #[test]
    fn row_added_on_one_side_is_preserved() {
        let base = table("| A | B |\n| --- | --- |\n| 1 | 2 |");
        let local = base.clone();
        let mut remote = base.clone();
        remote.rows.push(vec!["3".into(), "4".into()]);

        let outcome = merge_tables(&base, &local, &remote);
        assert!(!outcome.has_conflict);
        assert!(outcome.text.contains("| 3 | 4 |"));
    }

    #[test]
    fn row_deleted_on_one_side_propagates() {
        let base = table("| A | B |\n| --- | --- |\n| 1 | 2 |\n| 3 | 4 |");
        let mut local = base.clone();
        local.rows.pop();
        let remote = base.clone();

        let outcome = merge_tables(&base, &local, &remote);
        assert!(!outcome.has_conflict);
        assert!(!outcome.text.contains("| 3 | 4 |"));
        assert!(outcome.text.contains("| 1 | 2 |"));
    }
}

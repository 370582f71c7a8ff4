//! Minimal converter between markdown and storage XHTML.
//!
//! The push direction rides on pulldown-cmark. The pull direction is a
//! conservative tag mapper covering the elements the engine round-trips
//! (headings, emphasis, code, lists, tables, paragraphs); unknown markup is
//! stripped rather than guessed at.

use crate::content::ContentConverter;
use anyhow::Result;
use pulldown_cmark::{html, Options as CmarkOptions, Parser};
use regex::Regex;
use std::sync::OnceLock;

pub struct StorageConverter;

impl ContentConverter for StorageConverter {
    fn markdown_to_storage(&self, markdown: &str) -> Result<String> {
        let mut options = CmarkOptions::empty();
        options.insert(CmarkOptions::ENABLE_STRIKETHROUGH);
        options.insert(CmarkOptions::ENABLE_TABLES);

        let parser = Parser::new_ext(markdown, options);
        let mut out = String::new();
        html::push_html(&mut out, parser);
        Ok(out)
    }

    fn storage_to_markdown(&self, storage: &str) -> Result<String> {
        let mut text = convert_tables(storage);

        for level in 1..=6usize {
            let open = open_tag(&format!("h{level}"));
            let close = format!("</h{level}>");
            let hashes = "#".repeat(level);
            text = open.replace_all(&text, format!("\n{hashes} ")).to_string();
            text = text.replace(&close, "\n\n");
        }

        // fenced code blocks before inline code
        text = pre_code_open().replace_all(&text, "\n```\n").to_string();
        text = text.replace("</code></pre>", "\n```\n");

        for (open, close, marker) in [
            ("strong", "strong", "**"),
            ("b", "b", "**"),
            ("em", "em", "*"),
            ("i", "i", "*"),
            ("code", "code", "`"),
        ] {
            text = open_tag(open).replace_all(&text, marker).to_string();
            text = text.replace(&format!("</{close}>"), marker);
        }

        text = open_tag("li").replace_all(&text, "- ").to_string();
        text = text.replace("</li>", "\n");
        for tag in ["ul", "ol"] {
            text = open_tag(tag).replace_all(&text, "\n").to_string();
            text = text.replace(&format!("</{tag}>"), "\n");
        }

        text = open_tag("p").replace_all(&text, "").to_string();
        text = text.replace("</p>", "\n\n");
        text = br_tag().replace_all(&text, "\n").to_string();

        // whatever markup is left, drop it rather than invent syntax for it
        text = any_tag().replace_all(&text, "").to_string();
        text = unescape_entities(&text);
        text = collapse_blank_lines(&text);

        Ok(text)
    }
}

fn open_tag(name: &str) -> Regex {
    Regex::new(&format!(r"(?i)<{name}(\s[^>]*)?>")).unwrap()
}

fn pre_code_open() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<pre[^>]*>\s*<code[^>]*>").unwrap())
}

fn br_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<br\s*/?>").unwrap())
}

fn any_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").unwrap())
}

fn table_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<table[^>]*>(.*?)</table>").unwrap())
}

fn row_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").unwrap())
}

fn cell_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<t[hd][^>]*>(.*?)</t[hd]>").unwrap())
}

/// Rewrite `<table>` blocks into pipe tables. The first row becomes the
/// header; a separator row with the same column count follows it.
fn convert_tables(storage: &str) -> String {
    table_block()
        .replace_all(storage, |caps: &regex::Captures<'_>| {
            let inner = &caps[1];
            let mut lines = Vec::new();
            for (row_idx, row) in row_block().captures_iter(inner).enumerate() {
                let cells: Vec<String> = cell_block()
                    .captures_iter(&row[1])
                    .map(|c| {
                        let cell = any_tag().replace_all(&c[1], "");
                        unescape_entities(cell.trim())
                    })
                    .collect();
                if cells.is_empty() {
                    continue;
                }
                lines.push(format!("| {} |", cells.join(" | ")));
                if row_idx == 0 {
                    lines.push(format!("|{}", " --- |".repeat(cells.len())));
                }
            }
            format!("\n{}\n", lines.join("\n"))
        })
        .to_string()
}

fn unescape_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = Vec::new();
    let mut blank_run = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
            out.push("");
        } else {
            blank_run = 0;
            out.push(line.trim_end());
        }
    }
    let mut joined = out.join("\n");
    while joined.starts_with('\n') {
        joined.remove(0);
    }
    if !joined.is_empty() && !joined.ends_with('\n') {
        joined.push('\n');
    }
    joined
}

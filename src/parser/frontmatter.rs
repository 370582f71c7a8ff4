use crate::domain::PageId;
use crate::error::SyncError;
use gray_matter::engine::YAML;
use gray_matter::Matter;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;

/// Hard cap on YAML nesting. Anything deeper is treated as hostile input
/// (billion-laughs style bombs) rather than legitimate metadata.
pub const MAX_YAML_DEPTH: usize = 10;

/// The single front-matter key the engine owns. Everything else in the block
/// belongs to the user and survives rewrites untouched.
const URL_KEY: &str = "confluence_url";

#[derive(Debug, Default, Deserialize)]
struct PageFrontMatter {
    confluence_url: Option<String>,
}

/// A local document split into its identity and its body.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub page_id: Option<PageId>,
    pub space_key: Option<String>,
    pub body: String,
}

fn url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/spaces/([^/]+)/pages/(\d+)").unwrap())
}

/// Extract `(space_key, page_id)` from a wiki page URL, or None if the URL
/// does not carry the expected `/spaces/<key>/pages/<id>` shape.
pub fn parse_wiki_url(url: &str) -> Option<(String, String)> {
    let caps = url_pattern().captures(url)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Everything before `/spaces/` in a page URL, which is the API base.
pub fn base_url_of(url: &str) -> Option<String> {
    url.split_once("/spaces/").map(|(base, _)| base.to_string())
}

/// Build the canonical page URL the engine writes into front-matter.
pub fn build_wiki_url(base_url: &str, space_key: &str, page_id: &PageId) -> String {
    let base = base_url.trim_end_matches('/');
    format!("{base}/spaces/{space_key}/pages/{page_id}")
}

/// Split a document into `(front_matter_inner, body)`. Returns None when the
/// document has no front-matter block, in which case the whole content is the
/// body. Only a block starting at byte zero counts.
pub fn split_front_matter(content: &str) -> Option<(&str, &str)> {
    let rest = content.strip_prefix("---\n")?;
    let end = rest.find("\n---\n")?;
    let inner = &rest[..end];
    let body = &rest[end + "\n---\n".len()..];
    Some((inner, body))
}

fn yaml_depth(value: &serde_yaml::Value, depth: usize) -> usize {
    match value {
        serde_yaml::Value::Mapping(map) => map
            .values()
            .map(|v| yaml_depth(v, depth + 1))
            .max()
            .unwrap_or(depth + 1),
        serde_yaml::Value::Sequence(seq) => seq
            .iter()
            .map(|v| yaml_depth(v, depth + 1))
            .max()
            .unwrap_or(depth + 1),
        _ => depth,
    }
}

fn check_depth(path: &Path, block: &str) -> Result<(), SyncError> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(block).map_err(|e| SyncError::Frontmatter {
            path: path.to_path_buf(),
            message: format!("invalid YAML: {e}"),
        })?;
    if yaml_depth(&value, 0) > MAX_YAML_DEPTH {
        return Err(SyncError::Frontmatter {
            path: path.to_path_buf(),
            message: format!("YAML nesting exceeds the maximum depth of {MAX_YAML_DEPTH}"),
        });
    }
    Ok(())
}

/// Parse a local markdown document. A document without front-matter is a new
/// page: no id, whole content as body. Malformed YAML or a nesting bomb is a
/// hard error so we never sync a file we could not faithfully rewrite.
pub fn parse_document(path: &Path, content: &str) -> Result<ParsedDocument, SyncError> {
    let Some((inner, body)) = split_front_matter(content) else {
        return Ok(ParsedDocument {
            page_id: None,
            space_key: None,
            body: content.to_string(),
        });
    };

    check_depth(path, inner)?;

    let block = format!("---\n{inner}\n---\n");
    let matter = Matter::<YAML>::new();
    let data: PageFrontMatter = match matter.parse::<PageFrontMatter>(&block) {
        Ok(parsed) => parsed.data.unwrap_or_default(),
        Err(e) => {
            return Err(SyncError::Frontmatter {
                path: path.to_path_buf(),
                message: format!("invalid front-matter: {e}"),
            });
        }
    };

    let mut page_id = None;
    let mut space_key = None;
    if let Some(url) = data.confluence_url.as_deref() {
        if let Some((key, id)) = parse_wiki_url(url) {
            space_key = Some(key);
            page_id = Some(PageId::new(id));
        }
    }

    Ok(ParsedDocument {
        page_id,
        space_key,
        body: body.to_string(),
    })
}

/// Lenient id extraction for discovery scans. Anything unparseable is simply
/// "no id" so one broken file cannot poison a directory walk.
pub fn page_id_of(content: &str) -> Option<PageId> {
    let (inner, _) = split_front_matter(content)?;
    for line in inner.lines() {
        if let Some(rest) = line.strip_prefix(URL_KEY) {
            let url = rest.trim_start_matches(':').trim();
            if let Some((_, id)) = parse_wiki_url(url) {
                return Some(PageId::new(id));
            }
        }
    }
    None
}

/// Rewrite a document so its front-matter carries `url`, preserving every
/// other front-matter line byte-for-byte and leaving the body untouched.
/// Documents without front-matter gain a minimal block.
pub fn rewrite_front_matter(content: &str, url: &str) -> String {
    match split_front_matter(content) {
        Some((inner, body)) => {
            let mut lines: Vec<String> = Vec::new();
            lines.push(format!("{URL_KEY}: {url}"));
            for line in inner.lines() {
                if !line.trim_start().starts_with(URL_KEY) {
                    lines.push(line.to_string());
                }
            }
            format!("---\n{}\n---\n{}", lines.join("\n"), body)
        }
        None => format!("---\n{URL_KEY}: {url}\n---\n{content}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const URL: &str = "https://team.example.com/wiki/spaces/DOCS/pages/12345";

    #[test]
    fn url_components_round_trip() {
        let (space, id) = parse_wiki_url(URL).unwrap();
        assert_eq!(space, "DOCS");
        assert_eq!(id, "12345");
        assert_eq!(base_url_of(URL).unwrap(), "https://team.example.com/wiki");
        assert_eq!(
            build_wiki_url("https://team.example.com/wiki", "DOCS", &PageId::new("12345")),
            URL
        );
    }

    #[test]
    fn document_without_front_matter_is_a_new_page() {
        let doc = parse_document(&PathBuf::from("a.md"), "# Fresh\n").unwrap();
        assert!(doc.page_id.is_none());
        assert_eq!(doc.body, "# Fresh\n");
    }

    #[test]
    fn document_with_url_yields_identity() {
        let content = format!("---\nconfluence_url: {URL}\n---\n# Body\n");
        let doc = parse_document(&PathBuf::from("a.md"), &content).unwrap();
        assert_eq!(doc.page_id, Some(PageId::new("12345")));
        assert_eq!(doc.space_key.as_deref(), Some("DOCS"));
        assert_eq!(doc.body, "# Body\n");
    }

    #[test]
    fn nesting_bomb_is_rejected() {
        let mut inner = String::from("a:");
        for _ in 0..12 {
            inner = format!("a:\n  {}", inner.replace('\n', "\n  "));
        }
        let content = format!("---\n{inner}\n---\nbody\n");
        let err = parse_document(&PathBuf::from("bomb.md"), &content).unwrap_err();
        assert!(err.to_string().contains("depth"));
    }

    #[test]
    fn rewrite_preserves_foreign_keys_and_body() {
        let content = format!("---\ntags: [a, b]\nconfluence_url: {URL}\nowner: docs-team\n---\n# Body\n\ntext\n");
        let new_url = "https://team.example.com/wiki/spaces/DOCS/pages/99999";
        let rewritten = rewrite_front_matter(&content, new_url);

        let (inner, body) = split_front_matter(&rewritten).unwrap();
        assert!(inner.lines().next().unwrap().contains("99999"));
        assert!(inner.contains("tags: [a, b]"));
        assert!(inner.contains("owner: docs-team"));
        assert_eq!(body, "# Body\n\ntext\n");
    }

    #[test]
    fn rewrite_adds_block_to_bare_document() {
        let rewritten = rewrite_front_matter("# Bare\n", URL);
        let (inner, body) = split_front_matter(&rewritten).unwrap();
        assert_eq!(inner, format!("confluence_url: {URL}"));
        assert_eq!(body, "# Bare\n");
    }

    #[test]
    fn lenient_id_extraction_ignores_garbage() {
        assert!(page_id_of("no front matter at all").is_none());
        assert!(page_id_of("---\n: : :\n---\nbody").is_none());
        let content = format!("---\nconfluence_url: {URL}\n---\n");
        assert_eq!(page_id_of(&content), Some(PageId::new("12345")));
    }
}

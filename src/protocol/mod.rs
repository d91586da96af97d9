//! The `<sg-file>` file-write protocol.
//!
//! The same grammar frames files in a snapshot and carries file mutations
//! in model replies:
//!
//! ```text
//! <sg-file path="RELPATH"[ action="ACT"][ summary="SUM"]>
//! BODY
//! </sg-file>
//! ```
//!
//! Attribute values are double-quoted with no escapes. The first
//! `</sg-file>` after an opening tag closes the record.
//!
//! Two parsers consume it: [`StreamingFileParser`] is advisory and drives
//! preview events while a reply streams in; [`parse_file_writes`] /
//! [`apply_file_writes`] are authoritative and run once the reply is complete.

mod deserialize;
mod entities;
mod stream;

pub use deserialize::{apply_file_writes, parse_file_writes, CommitReport, ParsedReply, WrittenFile};
pub use entities::decode_html_entities;
pub use stream::{FileStreamEvent, StreamingFileParser, SPLIT_TAG_GUARD};

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const FILE_TAG: &str = "sg-file";
pub const OPEN_TAG_PREFIX: &str = "<sg-file";
pub const CLOSE_TAG: &str = "</sg-file>";

/// What a record asks the workspace to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    #[default]
    Write,
    Delete,
}

impl FileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileAction::Write => "write",
            FileAction::Delete => "delete",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "write" => Some(FileAction::Write),
            "delete" => Some(FileAction::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed `<sg-file>` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    pub path: String,
    pub action: FileAction,
    pub summary: Option<String>,
    /// Body with surrounding whitespace trimmed.
    pub body: String,
}

/// Attributes of an opening tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TagAttributes {
    pub path: String,
    pub action: FileAction,
    pub summary: Option<String>,
    pub placeholder: Option<String>,
}

fn attribute_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([A-Za-z_][A-Za-z0-9_-]*)\s*=\s*"([^"]*)""#).expect("valid regex"))
}

/// Parse the inside of an opening tag (everything between `<sg-file` and `>`).
pub(crate) fn parse_attributes(tag: &str) -> Result<TagAttributes, String> {
    let mut attrs: HashMap<&str, &str> = HashMap::new();
    for caps in attribute_regex().captures_iter(tag) {
        if let (Some(name), Some(value)) = (caps.get(1), caps.get(2)) {
            attrs.insert(name.as_str(), value.as_str());
        }
    }

    let path = attrs
        .get("path")
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| "missing path attribute".to_string())?;

    let action = match attrs.get("action") {
        Some(value) => {
            FileAction::parse(value).ok_or_else(|| format!("unknown action \"{value}\""))?
        }
        None => FileAction::Write,
    };

    Ok(TagAttributes {
        path: path.to_string(),
        action,
        summary: attrs.get("summary").map(|s| s.to_string()),
        placeholder: attrs.get("placeholder").map(|s| s.to_string()),
    })
}

/// Byte offset of the next opening tag in `text`.
///
/// `<sg-file` must be followed by whitespace, `>` or `/` so that e.g.
/// `<sg-files>` does not match.
pub(crate) fn find_open_tag(text: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(offset) = text[from..].find(OPEN_TAG_PREFIX) {
        let start = from + offset;
        let after = start + OPEN_TAG_PREFIX.len();
        match text[after..].chars().next() {
            Some(c) if c.is_whitespace() || c == '>' || c == '/' => return Some(start),
            // Not enough input yet to decide.
            None => return Some(start),
            Some(_) => from = after,
        }
    }
    None
}

/// Byte offset of the `>` that ends the tag starting at `text[0]`,
/// skipping any `>` inside double-quoted attribute values.
pub(crate) fn find_tag_end(text: &str) -> Option<usize> {
    let mut in_quotes = false;
    for (idx, c) in text.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '>' if !in_quotes => return Some(idx),
            _ => {}
        }
    }
    None
}

/// End of a complete opening tag starting at `tag[0]`.
///
/// The tag must close on its own line and before the next `<sg-file`;
/// anything else is an unbalanced quote or a truncated tag.
pub(crate) fn find_open_tag_end(tag: &str) -> Option<usize> {
    let end = find_tag_end(tag)?;
    let inner = tag.get(OPEN_TAG_PREFIX.len()..end)?;
    if inner.contains('\n') || find_open_tag(inner).is_some() {
        return None;
    }
    Some(end)
}

/// Paths named by every well-formed opening tag in `text`, in order of appearance.
pub fn referenced_paths(text: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut rest = text;

    while let Some(start) = find_open_tag(rest) {
        let tag = &rest[start..];
        match find_open_tag_end(tag) {
            Some(end) => {
                if let Ok(attrs) = parse_attributes(&tag[OPEN_TAG_PREFIX.len()..end]) {
                    paths.push(attrs.path);
                }
                rest = &tag[end + 1..];
            }
            None => rest = &tag[OPEN_TAG_PREFIX.len()..],
        }
    }
    paths
}

/// Whether `text` contains at least one opening tag.
pub fn contains_file_blocks(text: &str) -> bool {
    find_open_tag(text).is_some()
}

/// Remove every `<sg-file>` record from `text` and trim the remainder.
///
/// A trailing record with no closing tag is removed through the end of text.
pub fn strip_file_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = find_open_tag(rest) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start..];
        match after_open.find(CLOSE_TAG) {
            Some(close) => rest = &after_open[close + CLOSE_TAG.len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

/// Frame one file for a snapshot document.
pub(crate) fn render_file_record(path: &str, content: &str) -> String {
    let mut record = String::with_capacity(content.len() + path.len() + 32);
    record.push_str(&format!("<{FILE_TAG} path=\"{path}\">\n"));
    record.push_str(content);
    if !content.ends_with('\n') {
        record.push('\n');
    }
    record.push_str(CLOSE_TAG);
    record.push('\n');
    record
}

/// Frame a placeholder (path only, no body) for a snapshot document.
pub(crate) fn render_placeholder(path: &str, reason: &str) -> String {
    format!("<{FILE_TAG} path=\"{path}\" placeholder=\"{reason}\">{CLOSE_TAG}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attributes_defaults() {
        let attrs = parse_attributes(r#" path="src/a.ts""#).unwrap();
        assert_eq!(attrs.path, "src/a.ts");
        assert_eq!(attrs.action, FileAction::Write);
        assert_eq!(attrs.summary, None);
    }

    #[test]
    fn test_parse_attributes_any_order() {
        let attrs =
            parse_attributes(r#" summary="drop it" action="delete" path="old.ts""#).unwrap();
        assert_eq!(attrs.path, "old.ts");
        assert_eq!(attrs.action, FileAction::Delete);
        assert_eq!(attrs.summary.as_deref(), Some("drop it"));
    }

    #[test]
    fn test_parse_attributes_errors() {
        assert!(parse_attributes(r#" summary="x""#).is_err());
        assert!(parse_attributes(r#" path="a" action="rename""#).is_err());
    }

    #[test]
    fn test_find_open_tag_requires_boundary() {
        assert_eq!(find_open_tag(r#"x <sg-files> <sg-file path="a">"#), Some(13));
        assert_eq!(find_open_tag("no tags here"), None);
        assert_eq!(find_open_tag("trailing <sg-file"), Some(9));
    }

    #[test]
    fn test_find_tag_end_skips_quoted_gt() {
        let tag = r#"<sg-file path="a" summary="a > b">body"#;
        assert_eq!(&tag[..find_tag_end(tag).unwrap()], r#"<sg-file path="a" summary="a > b""#);
    }

    #[test]
    fn test_strip_file_blocks() {
        let reply = "Done.\n<sg-file path=\"a.ts\">x</sg-file>\nAlso <sg-file path=\"b\">y</sg-file> ok";
        assert_eq!(strip_file_blocks(reply), "Done.\n\nAlso  ok");
        assert_eq!(strip_file_blocks("intro <sg-file path=\"a\">never closed"), "intro");
        assert_eq!(strip_file_blocks("  just prose  "), "just prose");
    }

    #[test]
    fn test_referenced_paths() {
        let text = r#"<sg-file action="delete" path="a.ts"></sg-file><sg-file path="b/c.ts">x</sg-file>"#;
        assert_eq!(referenced_paths(text), vec!["a.ts", "b/c.ts"]);
    }

    #[test]
    fn test_referenced_paths_allows_quoted_gt() {
        let text = r#"<sg-file summary="a > b" path="src/x.ts">x</sg-file>"#;
        assert_eq!(referenced_paths(text), vec!["src/x.ts"]);
    }

    #[test]
    fn test_open_tag_end_rejects_unbalanced_quote() {
        let text = "<sg-file path=\"bad.ts>x</sg-file>\n<sg-file path=\"good.ts\">ok</sg-file>";
        assert_eq!(find_open_tag_end(text), None);
        assert_eq!(referenced_paths(text), vec!["good.ts"]);
        assert_eq!(find_open_tag_end(r#"<sg-file path="a">x"#), Some(17));
    }

    #[test]
    fn test_render_records_parse_back() {
        let record = render_file_record("src/a.ts", "let a = 1;");
        assert_eq!(record, "<sg-file path=\"src/a.ts\">\nlet a = 1;\n</sg-file>\n");

        let placeholder = render_placeholder("logo.png", "binary");
        let tag_end = find_tag_end(&placeholder).unwrap();
        let attrs = parse_attributes(&placeholder[OPEN_TAG_PREFIX.len()..tag_end]).unwrap();
        assert_eq!(attrs.placeholder.as_deref(), Some("binary"));
    }
}

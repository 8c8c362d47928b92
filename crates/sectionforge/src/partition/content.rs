//! Section content payloads.
//!
//! Captured outer HTML is cleaned before it is handed to a worker: script,
//! style and noscript blocks, comments and inline event handlers are
//! stripped and whitespace is collapsed. The result is capped at a
//! character budget on a char boundary.

use crate::dom::DomNode;
use regex::Regex;
use std::sync::LazyLock;

/// Appended when a payload is cut at the character budget.
pub const TRUNCATION_MARKER: &str = "\n<!-- content truncated -->";

static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript)\b[^>]*>.*?</(script|style|noscript)\s*>")
        .expect("valid regex")
});
static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
static EVENT_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\s+on[a-z]+\s*=\s*("[^"]*"|'[^']*'|[^\s>]+)"#).expect("valid regex")
});
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Strip non-visual markup from captured HTML.
pub fn clean_html(html: &str) -> String {
    let without_blocks = BLOCK_RE.replace_all(html, "");
    let without_comments = COMMENT_RE.replace_all(&without_blocks, "");
    let without_handlers = EVENT_ATTR_RE.replace_all(&without_comments, "");
    WHITESPACE_RE
        .replace_all(&without_handlers, " ")
        .trim()
        .to_string()
}

/// Cap `content` at `max_chars` characters, appending [`TRUNCATION_MARKER`]
/// when anything was cut.
pub fn truncate_chars(content: String, max_chars: usize) -> String {
    if content.chars().nth(max_chars).is_none() {
        return content;
    }
    let mut truncated: String = content.chars().take(max_chars).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

/// The payload for a section produced from `node`: cleaned HTML when the
/// extractor captured it, the node's text otherwise.
pub fn section_content(node: &DomNode, max_chars: usize) -> String {
    let raw = match (&node.html, &node.text) {
        (Some(html), _) => clean_html(html),
        (None, Some(text)) => WHITESPACE_RE.replace_all(text, " ").trim().to_string(),
        (None, None) => String::new(),
    };
    truncate_chars(raw, max_chars)
}

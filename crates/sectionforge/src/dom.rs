//! DOM input produced by the upstream extractor.
//!
//! The partitioner never drives a browser. It consumes a [`DomSnapshot`]:
//! the page's pixel dimensions plus a tree of [`DomNode`]s carrying tag,
//! identity, bounding rectangle and a content-length measure. The JSON
//! shape accepts both snake_case and the camelCase names browser-side
//! extraction scripts tend to emit (`tagName`, `classList`, ...).

use crate::geometry::{Rect, estimate_tokens};
use serde::{Deserialize, Serialize};

/// Page dimensions in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl PageSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// The page as a rectangle anchored at the origin.
    pub fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width, self.height)
    }
}

/// Advisory style hints. Passed through to tasks; never used by the
/// partitioning invariants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleHints {
    #[serde(
        default,
        alias = "backgroundColor",
        skip_serializing_if = "Option::is_none"
    )]
    pub background: Option<String>,
    #[serde(default, alias = "textColor", skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// One element of the extracted tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomNode {
    #[serde(alias = "tagName")]
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, alias = "classList", skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    pub rect: Rect,
    /// Length of the node's serialized content (subtree included). When
    /// zero, the length of `html` or `text` is used instead.
    #[serde(default, alias = "contentLength")]
    pub content_length: usize,
    /// Outer HTML captured by the extractor, if any.
    #[serde(default, alias = "outerHTML", skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub styles: StyleHints,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DomNode>,
}

impl DomNode {
    pub fn new(tag: impl Into<String>, rect: Rect) -> Self {
        Self {
            tag: tag.into(),
            rect,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn with_content_length(mut self, len: usize) -> Self {
        self.content_length = len;
        self
    }

    /// Set the content length so that the node estimates to `tokens`.
    pub fn with_tokens(self, tokens: usize) -> Self {
        self.with_content_length(tokens * crate::geometry::CHARS_PER_TOKEN)
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    pub fn with_styles(mut self, styles: StyleHints) -> Self {
        self.styles = styles;
        self
    }

    pub fn with_children(mut self, children: Vec<DomNode>) -> Self {
        self.children = children;
        self
    }

    /// Lowercased tag name.
    pub fn tag_name(&self) -> String {
        self.tag.to_ascii_lowercase()
    }

    /// Effective content length (explicit measure, else captured HTML, else text).
    pub fn content_len(&self) -> usize {
        if self.content_length > 0 {
            return self.content_length;
        }
        self.html
            .as_ref()
            .or(self.text.as_ref())
            .map_or(0, |s| s.len())
    }

    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(self.content_len())
    }

    /// CSS-like selector for diagnostics and task descriptions, e.g.
    /// `section#hero.banner.dark`.
    pub fn selector(&self) -> String {
        let mut s = self.tag_name();
        if let Some(ref id) = self.id
            && !id.is_empty()
        {
            s.push('#');
            s.push_str(id);
        }
        for class in self.classes.iter().filter(|c| !c.is_empty()).take(3) {
            s.push('.');
            s.push_str(class);
        }
        s
    }
}

/// A page as handed over by the extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub page: PageSize,
    pub root: DomNode,
}

impl DomSnapshot {
    pub fn new(page: PageSize, root: DomNode) -> Self {
        Self {
            url: None,
            page,
            root,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, String> {
        serde_json::from_str(json).map_err(|e| format!("invalid DOM snapshot: {e}"))
    }
}

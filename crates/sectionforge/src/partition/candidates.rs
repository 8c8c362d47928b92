//! Candidate extraction: the top-down walk that picks section candidates.

use super::{Diagnostic, GeometryIssue, PartitionConfig};
use crate::dom::{DomNode, PageSize};
use crate::geometry::Rect;

/// Container tags that may act as transparent full-page wrappers.
const WRAPPER_TAGS: &[&str] = &["html", "body", "div", "main"];

/// A node selected as a section candidate. Borrows the node so its
/// children stay reachable for splitting.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub node: &'a DomNode,
    pub depth: u32,
}

impl<'a> Candidate<'a> {
    pub fn new(node: &'a DomNode, depth: u32) -> Self {
        Self { node, depth }
    }

    pub fn tokens(&self) -> usize {
        self.node.estimated_tokens()
    }
}

/// Candidates in document order plus the diagnostics produced on the way.
#[derive(Debug, Default)]
pub struct Extraction<'a> {
    pub candidates: Vec<Candidate<'a>>,
    pub diagnostics: Vec<Diagnostic>,
}

/// How a single node is treated by the filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Non-content tag: ignored along with its subtree.
    Skip,
    /// Unusable rectangle: reported, subtree still walked.
    Malformed(GeometryIssue),
    /// Passes the size rule but carries too little content.
    Decorative,
    /// Becomes a section candidate.
    Qualifies,
    /// Fails the size rule (or is a full-page wrapper): walk its children.
    Descend,
}

pub fn geometry_issue(rect: &Rect) -> Option<GeometryIssue> {
    let finite = [rect.x, rect.y, rect.width, rect.height]
        .iter()
        .all(|v| v.is_finite());
    if !finite {
        Some(GeometryIssue::NonFinite)
    } else if rect.width < 0.0 || rect.height < 0.0 {
        Some(GeometryIssue::NegativeSize)
    } else {
        None
    }
}

/// Whether `node` is a container spanning (nearly) the whole page.
pub fn is_full_page_wrapper(node: &DomNode, page: PageSize, config: &PartitionConfig) -> bool {
    if node.children.is_empty() || !WRAPPER_TAGS.contains(&node.tag_name().as_str()) {
        return false;
    }
    node.rect.width >= page.width * config.wrapper_ratio
        && node.rect.height >= page.height * config.wrapper_ratio
}

/// Apply the tag, geometry, size and token filters to one node.
///
/// `reference_width` is the page width for top-level candidates and the
/// parent's width during splitting.
pub fn classify(node: &DomNode, reference_width: f64, config: &PartitionConfig) -> Verdict {
    if config.is_skipped_tag(&node.tag) {
        return Verdict::Skip;
    }
    if let Some(issue) = geometry_issue(&node.rect) {
        return Verdict::Malformed(issue);
    }

    let tokens = node.estimated_tokens();
    let tall_enough = node.rect.height >= config.min_section_height;
    let wide_enough = node.rect.width >= reference_width * config.min_width_ratio;
    let heavy = tokens > config.large_token_threshold;

    if !(tall_enough && (wide_enough || heavy)) {
        return Verdict::Descend;
    }
    if tokens < config.min_section_tokens {
        return Verdict::Decorative;
    }
    Verdict::Qualifies
}

/// Walk the tree rooted at `root` and collect section candidates.
pub fn extract<'a>(root: &'a DomNode, page: PageSize, config: &PartitionConfig) -> Extraction<'a> {
    walk(root, page, config)
}

fn walk<'a>(node: &'a DomNode, page: PageSize, config: &PartitionConfig) -> Extraction<'a> {
    if is_full_page_wrapper(node, page, config) && !config.is_skipped_tag(&node.tag) {
        return descend(node, page, config, Vec::new());
    }

    match classify(node, page.width, config) {
        Verdict::Skip | Verdict::Decorative => Extraction::default(),
        Verdict::Qualifies => Extraction {
            candidates: vec![Candidate::new(node, 0)],
            diagnostics: Vec::new(),
        },
        Verdict::Malformed(issue) => {
            let diagnostic = Diagnostic::MalformedGeometry {
                selector: node.selector(),
                issue,
            };
            descend(node, page, config, vec![diagnostic])
        }
        Verdict::Descend => descend(node, page, config, Vec::new()),
    }
}

fn descend<'a>(
    node: &'a DomNode,
    page: PageSize,
    config: &PartitionConfig,
    diagnostics: Vec<Diagnostic>,
) -> Extraction<'a> {
    node.children.iter().map(|child| walk(child, page, config)).fold(
        Extraction {
            candidates: Vec::new(),
            diagnostics,
        },
        |mut acc, next| {
            acc.candidates.extend(next.candidates);
            acc.diagnostics.extend(next.diagnostics);
            acc
        },
    )
}

//! Section partitioning: split a DOM tree into bounded, non-overlapping,
//! page-covering [`Section`]s.
//!
//! [`partition()`] runs six stages in order, each a pure function from one
//! sequence to the next:
//!
//! 1. **[`candidates`]**: top-down walk selecting section candidates,
//!    descending transparently through full-page wrappers.
//! 2. **[`split`]**: depth-first splitting of candidates above the token
//!    budget into their qualifying children.
//! 3. **[`order`]**: row grouping into reading order (side-by-side columns
//!    left-to-right, rows top-to-bottom), then overlap removal.
//! 4. **[`coverage`]**: gap merging so the sections cover the page without
//!    placeholder sections.
//! 5. **[`validate`]**: invariant re-check producing [`Diagnostic`]s.
//! 6. Renumbering `1..=N` in reading order.
//!
//! Partitioning never fails. Malformed geometry, oversized leaves and
//! coverage shortfalls degrade into diagnostics on the returned
//! [`Partition`].
//!
//! # Example
//!
//! ```
//! use sectionforge::dom::{DomNode, PageSize};
//! use sectionforge::geometry::Rect;
//! use sectionforge::partition::{PartitionConfig, partition};
//!
//! let page = PageSize::new(1200.0, 2000.0);
//! let root = DomNode::new("body", page.bounds()).with_children(vec![
//!     DomNode::new("header", Rect::new(0.0, 0.0, 1200.0, 800.0)).with_tokens(1_500),
//!     DomNode::new("main", Rect::new(0.0, 800.0, 1200.0, 1200.0)).with_tokens(3_000),
//! ]);
//!
//! let result = partition(&root, page, &PartitionConfig::default());
//! assert_eq!(result.sections.len(), 2);
//! assert_eq!(result.sections[0].name(), "section_1");
//! ```

pub mod candidates;
pub mod content;
pub mod coverage;
pub mod order;
pub mod split;
pub mod validate;

use crate::dom::{DomNode, DomSnapshot, PageSize, StyleHints};
use crate::geometry::Rect;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Tags that never become sections and are never descended into.
pub const DEFAULT_SKIP_TAGS: &[&str] = &[
    "script", "style", "head", "meta", "link", "noscript", "template", "svg", "path", "iframe",
    "br", "hr", "title", "base",
];

// ── Configuration ──────────────────────────────────────────────────

/// Tunable thresholds for [`partition()`].
///
/// The defaults are empirically chosen; none of them is load-bearing on its
/// own, so every one is exposed.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionConfig {
    /// Token budget per section. Default: 10 000.
    pub max_section_tokens: usize,
    /// Minimum height (px) for a node to qualify. Default: 50.
    pub min_section_height: f64,
    /// Minimum width as a fraction of the reference width (page width for
    /// top-level candidates, parent width during splitting). Default: 0.5.
    pub min_width_ratio: f64,
    /// Token count above which the width rule is waived, admitting narrow
    /// but content-heavy columns. Default: 2 000.
    pub large_token_threshold: usize,
    /// Candidates below this many tokens are decorative and dropped. Default: 50.
    pub min_section_tokens: usize,
    /// Containers covering at least this fraction of both page dimensions
    /// are descended into rather than treated as sections. Default: 0.9.
    pub wrapper_ratio: f64,
    /// Maximum split recursion depth. Default: 5.
    pub max_split_depth: u32,
    /// Vertical overlap ratio above which two sections share a row. Default: 0.3.
    pub row_overlap_ratio: f64,
    /// Overlap ratio (of the smaller area) above which one of two sections
    /// is discarded. Default: 0.5.
    pub max_overlap_ratio: f64,
    /// Minimum fraction of the page the sections must cover. Default: 0.8.
    pub min_coverage: f64,
    /// Vertical gaps larger than this (px) are merged into neighbours. Default: 30.
    pub gap_threshold: f64,
    /// Maximum characters of cleaned content kept per section. Default: 40 000.
    pub max_content_chars: usize,
    /// Non-content tags, see [`DEFAULT_SKIP_TAGS`].
    pub skip_tags: Vec<String>,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            max_section_tokens: 10_000,
            min_section_height: 50.0,
            min_width_ratio: 0.5,
            large_token_threshold: 2_000,
            min_section_tokens: 50,
            wrapper_ratio: 0.9,
            max_split_depth: 5,
            row_overlap_ratio: 0.3,
            max_overlap_ratio: 0.5,
            min_coverage: 0.8,
            gap_threshold: 30.0,
            max_content_chars: 40_000,
            skip_tags: DEFAULT_SKIP_TAGS.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl PartitionConfig {
    /// Set the per-section token budget.
    pub fn with_max_section_tokens(mut self, tokens: usize) -> Self {
        self.max_section_tokens = tokens;
        self
    }

    /// Set the minimum section height in pixels.
    pub fn with_min_section_height(mut self, px: f64) -> Self {
        self.min_section_height = px;
        self
    }

    /// Set the gap-merge threshold in pixels.
    pub fn with_gap_threshold(mut self, px: f64) -> Self {
        self.gap_threshold = px;
        self
    }

    /// Set the per-section content cap in characters.
    pub fn with_max_content_chars(mut self, chars: usize) -> Self {
        self.max_content_chars = chars;
        self
    }

    pub fn is_skipped_tag(&self, tag: &str) -> bool {
        self.skip_tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

// ── Output types ───────────────────────────────────────────────────

/// Why a section was kept above the token budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizeReason {
    /// No child passed the section filters (including leaves with no children).
    NoValidChildren,
    /// Splitting stopped at [`PartitionConfig::max_split_depth`].
    DepthLimit,
}

/// A rectangle-bounded, token-bounded unit of page content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Ordinal in reading order, starting at 1.
    pub id: usize,
    pub rect: Rect,
    /// Estimated tokens (content length ÷ 4).
    pub tokens: usize,
    /// Cleaned HTML (or text) payload, bounded by `max_content_chars`.
    pub content: String,
    /// Selector of the originating node.
    pub selector: String,
    #[serde(default)]
    pub hints: StyleHints,
    /// Set when the section exceeds the token budget and could not be split.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oversize: Option<OversizeReason>,
    /// Split depth at which the section was produced (0 = top-level candidate).
    #[serde(default)]
    pub depth: u32,
}

impl Section {
    /// Canonical name, used for task ids and output namespaces.
    pub fn name(&self) -> String {
        format!("section_{}", self.id)
    }

    pub fn is_oversized(&self) -> bool {
        self.oversize.is_some()
    }
}

/// What went wrong with a geometry value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryIssue {
    NonFinite,
    NegativeSize,
}

/// A structured partitioning degradation. Never fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// A node was skipped because its rectangle is unusable.
    MalformedGeometry {
        selector: String,
        issue: GeometryIssue,
    },
    /// A section exceeds the token budget.
    Oversized {
        section: usize,
        tokens: usize,
        max_tokens: usize,
        reason: OversizeReason,
    },
    /// Two sections still overlap beyond the configured ratio.
    Overlap {
        first: usize,
        second: usize,
        ratio: f64,
    },
    /// The sections cover less of the page than required.
    CoverageShortfall { coverage: f64, required: f64 },
    /// Nothing in the tree qualified as a section.
    NoSections,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::MalformedGeometry { selector, issue } => {
                write!(f, "skipped {selector}: malformed geometry ({issue:?})")
            }
            Diagnostic::Oversized {
                section,
                tokens,
                max_tokens,
                reason,
            } => write!(
                f,
                "section_{section} has ~{tokens} tokens (budget {max_tokens}), kept as-is: {reason:?}"
            ),
            Diagnostic::Overlap {
                first,
                second,
                ratio,
            } => write!(
                f,
                "section_{first} and section_{second} overlap by {:.0}%",
                ratio * 100.0
            ),
            Diagnostic::CoverageShortfall { coverage, required } => write!(
                f,
                "sections cover {:.1}% of the page (required {:.0}%)",
                coverage * 100.0,
                required * 100.0
            ),
            Diagnostic::NoSections => write!(f, "no node qualified as a section"),
        }
    }
}

/// The result of [`partition()`]: ordered sections plus diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub page: PageSize,
    /// Sections in reading order, numbered `1..=N`.
    pub sections: Vec<Section>,
    pub diagnostics: Vec<Diagnostic>,
    /// Fraction of the page area covered by the union of section rectangles.
    pub coverage: f64,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn total_tokens(&self) -> usize {
        self.sections.iter().map(|s| s.tokens).sum()
    }

    pub fn oversized(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| s.is_oversized())
    }

    /// Rebuild a flat DOM snapshot with one node per section under a
    /// full-page body. Partitioning the result of an already valid
    /// partition reproduces the same sections.
    pub fn to_snapshot(&self) -> DomSnapshot {
        let children = self
            .sections
            .iter()
            .map(|s| DomNode {
                tag: "div".into(),
                id: Some(s.name()),
                classes: Vec::new(),
                rect: s.rect,
                content_length: s.tokens * crate::geometry::CHARS_PER_TOKEN,
                html: Some(s.content.clone()),
                text: None,
                styles: s.hints.clone(),
                children: Vec::new(),
            })
            .collect();
        let root = DomNode::new("body", self.page.bounds())
            .with_tokens(self.total_tokens())
            .with_children(children);
        DomSnapshot::new(self.page, root)
    }

    /// One line per section, for logs and the CLI.
    pub fn to_log_string(&self) -> String {
        let mut lines = vec![format!(
            "{} sections, {:.1}% coverage, {} diagnostics",
            self.sections.len(),
            self.coverage * 100.0,
            self.diagnostics.len()
        )];
        for s in &self.sections {
            lines.push(format!(
                "  {:<12} {:>7.0}..{:<7.0} {:>6} tok  {}{}",
                s.name(),
                s.rect.top(),
                s.rect.bottom(),
                s.tokens,
                s.selector,
                if s.is_oversized() { "  [oversized]" } else { "" }
            ));
        }
        lines.join("\n")
    }
}

// ── Pipeline ───────────────────────────────────────────────────────

/// Partition a DOM tree into ordered sections.
///
/// See the [module docs](self) for the stage breakdown. Always returns a
/// usable partition; residual invariant violations are reported in
/// [`Partition::diagnostics`].
pub fn partition(root: &DomNode, page: PageSize, config: &PartitionConfig) -> Partition {
    let extraction = candidates::extract(root, page, config);
    let mut diagnostics = extraction.diagnostics;
    debug!("Extracted {} candidates", extraction.candidates.len());

    let mut candidate_list = extraction.candidates;
    if candidate_list.is_empty()
        && root.estimated_tokens() >= config.min_section_tokens
        && candidates::geometry_issue(&root.rect).is_none()
        && !config.is_skipped_tag(&root.tag)
    {
        // Nothing qualified on its own: fall back to the root as one candidate.
        debug!("No candidates qualified; falling back to the root node");
        candidate_list.push(candidates::Candidate::new(root, 0));
    }

    let split_ctx = split::SplitContext::new(page, config);
    let (resolved, split_diagnostics): (Vec<_>, Vec<_>) = candidate_list
        .into_iter()
        .map(|c| split::resolve(c, &split_ctx))
        .map(|out| (out.sections, out.diagnostics))
        .unzip();
    let sections: Vec<Section> = resolved.into_iter().flatten().collect();
    diagnostics.extend(split_diagnostics.into_iter().flatten());
    debug!("Resolved {} sections after splitting", sections.len());

    let sections = order::reading_order(sections, config.row_overlap_ratio);
    let (sections, removed) = order::remove_overlaps(sections, config.max_overlap_ratio);
    if removed > 0 {
        debug!("Removed {removed} overlapping sections");
    }

    let sections = coverage::merge_gaps(sections, page.height, config.gap_threshold);

    let sections: Vec<Section> = sections
        .into_iter()
        .enumerate()
        .map(|(i, mut s)| {
            s.id = i + 1;
            s
        })
        .collect();

    let report = validate::validate(&sections, page, config);
    diagnostics.extend(report.diagnostics);
    for d in &diagnostics {
        warn!("Partition diagnostic: {d}");
    }

    info!(
        "Partitioned page {}x{} into {} sections ({:.1}% coverage)",
        page.width,
        page.height,
        sections.len(),
        report.coverage * 100.0
    );

    Partition {
        page,
        sections,
        diagnostics,
        coverage: report.coverage,
    }
}

/// Partition an extractor snapshot.
pub fn partition_snapshot(snapshot: &DomSnapshot, config: &PartitionConfig) -> Partition {
    partition(&snapshot.root, snapshot.page, config)
}

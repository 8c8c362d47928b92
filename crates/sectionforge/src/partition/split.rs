//! Size-bounded splitting.
//!
//! A candidate within the token budget becomes one section. An oversized
//! candidate is replaced by its qualifying children, each resolved
//! completely (including its own splits) before the next sibling, so the
//! output stays in document order. When no child qualifies, or the depth
//! limit is reached, the candidate is kept and flagged.

use super::candidates::{Candidate, Verdict, classify};
use super::content::section_content;
use super::{Diagnostic, OversizeReason, PartitionConfig, Section};
use crate::dom::{DomNode, PageSize};
use tracing::debug;

/// Inputs shared by every level of the recursion.
#[derive(Debug, Clone, Copy)]
pub struct SplitContext<'c> {
    pub page: PageSize,
    pub config: &'c PartitionConfig,
}

impl<'c> SplitContext<'c> {
    pub fn new(page: PageSize, config: &'c PartitionConfig) -> Self {
        Self { page, config }
    }
}

/// Sections resolved from one candidate, in depth-first order.
#[derive(Debug, Default)]
pub struct SplitOutcome {
    pub sections: Vec<Section>,
    pub diagnostics: Vec<Diagnostic>,
}

impl SplitOutcome {
    fn single(section: Section) -> Self {
        Self {
            sections: vec![section],
            diagnostics: Vec::new(),
        }
    }

    fn merge(mut self, other: SplitOutcome) -> Self {
        self.sections.extend(other.sections);
        self.diagnostics.extend(other.diagnostics);
        self
    }
}

/// Resolve one candidate into one or more sections.
pub fn resolve(candidate: Candidate<'_>, ctx: &SplitContext<'_>) -> SplitOutcome {
    resolve_node(candidate.node, candidate.depth, ctx)
}

fn resolve_node(node: &DomNode, depth: u32, ctx: &SplitContext<'_>) -> SplitOutcome {
    let config = ctx.config;
    if node.estimated_tokens() <= config.max_section_tokens {
        return SplitOutcome::single(make_section(node, depth, None, config));
    }
    if depth >= config.max_split_depth {
        debug!(
            "Split depth limit reached at {} (~{} tokens)",
            node.selector(),
            node.estimated_tokens()
        );
        return SplitOutcome::single(make_section(
            node,
            depth,
            Some(OversizeReason::DepthLimit),
            config,
        ));
    }

    let (children, diagnostics) = qualifying_children(node, config);
    if children.is_empty() {
        return SplitOutcome {
            sections: vec![make_section(
                node,
                depth,
                Some(OversizeReason::NoValidChildren),
                config,
            )],
            diagnostics,
        };
    }

    debug!(
        "Splitting {} (~{} tokens) into {} children",
        node.selector(),
        node.estimated_tokens(),
        children.len()
    );
    children
        .into_iter()
        .map(|child| resolve_node(child, depth + 1, ctx))
        .fold(
            SplitOutcome {
                sections: Vec::new(),
                diagnostics,
            },
            SplitOutcome::merge,
        )
}

/// Children passing the section filters, measured against the parent's width.
fn qualifying_children<'a>(
    node: &'a DomNode,
    config: &PartitionConfig,
) -> (Vec<&'a DomNode>, Vec<Diagnostic>) {
    let mut diagnostics = Vec::new();
    let children = node
        .children
        .iter()
        .filter(|child| match classify(child, node.rect.width, config) {
            Verdict::Qualifies => true,
            Verdict::Malformed(issue) => {
                diagnostics.push(Diagnostic::MalformedGeometry {
                    selector: child.selector(),
                    issue,
                });
                false
            }
            Verdict::Skip | Verdict::Decorative | Verdict::Descend => false,
        })
        .collect();
    (children, diagnostics)
}

fn make_section(
    node: &DomNode,
    depth: u32,
    oversize: Option<OversizeReason>,
    config: &PartitionConfig,
) -> Section {
    Section {
        id: 0,
        rect: node.rect,
        tokens: node.estimated_tokens(),
        content: section_content(node, config.max_content_chars),
        selector: node.selector(),
        hints: node.styles.clone(),
        oversize,
        depth,
    }
}

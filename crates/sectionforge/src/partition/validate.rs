//! Invariant re-check on a finished, renumbered section list.

use super::{Diagnostic, OversizeReason, PartitionConfig, Section};
use crate::dom::PageSize;
use crate::geometry::{coverage_ratio, overlap_ratio};

/// Residual violations and the measured coverage.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub diagnostics: Vec<Diagnostic>,
    pub coverage: f64,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Check non-overlap, coverage and bounded size. Never fails; every
/// violation becomes a [`Diagnostic`].
pub fn validate(sections: &[Section], page: PageSize, config: &PartitionConfig) -> ValidationReport {
    if sections.is_empty() {
        return ValidationReport {
            diagnostics: vec![Diagnostic::NoSections],
            coverage: 0.0,
        };
    }

    let mut diagnostics = Vec::new();

    for (i, a) in sections.iter().enumerate() {
        for b in &sections[i + 1..] {
            let ratio = overlap_ratio(&a.rect, &b.rect);
            if ratio > config.max_overlap_ratio {
                diagnostics.push(Diagnostic::Overlap {
                    first: a.id,
                    second: b.id,
                    ratio,
                });
            }
        }
    }

    diagnostics.extend(
        sections
            .iter()
            .filter(|s| s.tokens > config.max_section_tokens)
            .map(|s| Diagnostic::Oversized {
                section: s.id,
                tokens: s.tokens,
                max_tokens: config.max_section_tokens,
                reason: s.oversize.unwrap_or(OversizeReason::NoValidChildren),
            }),
    );

    let rects: Vec<_> = sections.iter().map(|s| s.rect).collect();
    let coverage = coverage_ratio(&rects, &page.bounds());
    if coverage < config.min_coverage {
        diagnostics.push(Diagnostic::CoverageShortfall {
            coverage,
            required: config.min_coverage,
        });
    }

    ValidationReport {
        diagnostics,
        coverage,
    }
}

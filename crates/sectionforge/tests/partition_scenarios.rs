//! End-to-end partition scenarios on hand-built pages.

use sectionforge::dom::{DomNode, PageSize};
use sectionforge::geometry::Rect;
use sectionforge::partition::{Diagnostic, Partition, PartitionConfig, partition, partition_snapshot};
use sectionforge::task::{OutputLayout, SourceContext, build_tasks};

fn body(page: PageSize, children: Vec<DomNode>) -> DomNode {
    DomNode::new("body", page.bounds()).with_children(children)
}

/// Rect, tokens and id of every section, for comparisons.
fn shape(p: &Partition) -> Vec<(usize, Rect, usize)> {
    p.sections.iter().map(|s| (s.id, s.rect, s.tokens)).collect()
}

fn assert_idempotent(first: &Partition, config: &PartitionConfig) {
    let again = partition_snapshot(&first.to_snapshot(), config);
    assert_eq!(shape(&again), shape(first));
    assert!(again.sections.iter().all(|s| !s.is_oversized()));
}

#[test]
fn three_stacked_blocks_become_three_sections() {
    let page = PageSize::new(1200.0, 4000.0);
    let root = body(
        page,
        vec![
            DomNode::new("div", Rect::new(0.0, 0.0, 1200.0, 1000.0))
                .with_id("top")
                .with_tokens(2_000),
            DomNode::new("div", Rect::new(0.0, 1000.0, 1200.0, 2000.0))
                .with_id("middle")
                .with_tokens(2_000),
            DomNode::new("div", Rect::new(0.0, 3000.0, 1200.0, 1000.0))
                .with_id("bottom")
                .with_tokens(2_000),
        ],
    );
    let config = PartitionConfig::default();

    let result = partition(&root, page, &config);

    assert_eq!(result.len(), 3);
    let selectors: Vec<&str> = result.sections.iter().map(|s| s.selector.as_str()).collect();
    assert_eq!(selectors, vec!["div#top", "div#middle", "div#bottom"]);
    let ids: Vec<usize> = result.sections.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(result.oversized().count(), 0);
    assert!(result.coverage >= 0.95, "coverage {}", result.coverage);
    assert!(result.diagnostics.is_empty());

    assert_idempotent(&result, &config);
}

#[test]
fn oversized_block_splits_into_its_children() {
    let page = PageSize::new(1200.0, 6000.0);
    let rows: Vec<DomNode> = (0..10)
        .map(|i| {
            DomNode::new("article", Rect::new(0.0, i as f64 * 500.0, 1200.0, 500.0))
                .with_id(format!("row{i}"))
                .with_tokens(5_000)
        })
        .collect();
    let listing = DomNode::new("div", Rect::new(0.0, 0.0, 1200.0, 5000.0))
        .with_id("listing")
        .with_tokens(50_000)
        .with_children(rows);
    let config = PartitionConfig::default();

    let result = partition(&body(page, vec![listing]), page, &config);

    assert_eq!(result.len(), 10);
    assert_eq!(result.oversized().count(), 0);
    assert!(result.sections.iter().all(|s| s.tokens <= config.max_section_tokens));
    assert!(result.sections.iter().all(|s| s.depth == 1));
    assert_eq!(result.sections[0].selector, "article#row0");
    assert_eq!(result.sections[9].selector, "article#row9");
    // The trailing 1000px band is absorbed by the last row.
    assert_eq!(result.sections[9].rect.bottom(), 6000.0);
    assert!(result.coverage >= 0.99);

    assert_idempotent(&result, &config);
}

#[test]
fn overlap_keeps_the_heavier_section() {
    let page = PageSize::new(1200.0, 1000.0);
    // 300px of 500px shared: 60% of the smaller (equal) area.
    let root = body(
        page,
        vec![
            DomNode::new("div", Rect::new(0.0, 0.0, 1200.0, 500.0))
                .with_id("light")
                .with_tokens(100),
            DomNode::new("div", Rect::new(0.0, 200.0, 1200.0, 500.0))
                .with_id("heavy")
                .with_tokens(500),
        ],
    );

    let result = partition(&root, page, &PartitionConfig::default());

    assert_eq!(result.len(), 1);
    assert_eq!(result.sections[0].selector, "div#heavy");
    assert_eq!(result.sections[0].tokens, 500);
    assert!(
        !result
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::Overlap { .. }))
    );
}

#[test]
fn childless_oversized_block_is_flagged() {
    let page = PageSize::new(1200.0, 2000.0);
    let root = body(
        page,
        vec![
            DomNode::new("section", Rect::new(0.0, 0.0, 1200.0, 2000.0))
                .with_id("wall")
                .with_tokens(30_000),
        ],
    );
    let result = partition(&root, page, &PartitionConfig::default());

    assert_eq!(result.len(), 1);
    assert!(result.sections[0].is_oversized());
    assert!(
        result
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::Oversized { section: 1, .. }))
    );
}

#[test]
fn side_by_side_columns_read_left_to_right() {
    let page = PageSize::new(1200.0, 1000.0);
    let root = body(
        page,
        vec![
            DomNode::new("header", Rect::new(0.0, 0.0, 1200.0, 200.0)).with_tokens(300),
            DomNode::new("aside", Rect::new(800.0, 200.0, 400.0, 800.0)).with_tokens(2_500),
            DomNode::new("main", Rect::new(0.0, 210.0, 800.0, 790.0)).with_tokens(6_000),
        ],
    );
    let result = partition(&root, page, &PartitionConfig::default());

    let selectors: Vec<&str> = result.sections.iter().map(|s| s.selector.as_str()).collect();
    assert_eq!(selectors, vec!["header", "main", "aside"]);
}

#[test]
fn tasks_are_deterministic() {
    let page = PageSize::new(1200.0, 3000.0);
    let root = body(
        page,
        (0..3)
            .map(|i| {
                DomNode::new("section", Rect::new(0.0, i as f64 * 1000.0, 1200.0, 1000.0))
                    .with_tokens(1_000)
                    .with_html(format!("<section><h2>Block {i}</h2><script>x()</script></section>"))
            })
            .collect(),
    );
    let result = partition(&root, page, &PartitionConfig::default().with_max_section_tokens(5_000));
    let source = SourceContext::new("example.com")
        .with_base_url("https://example.com")
        .with_css_variable("--brand", "#0af")
        .with_shared("fonts", serde_json::json!(["Inter"]));

    let first = build_tasks(&result.sections, &source, &OutputLayout::default());
    let second = build_tasks(&result.sections, &source, &OutputLayout::default());

    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert!(first.iter().all(|t| !t.context.content.contains("<script")));
}

//! Gap merging.
//!
//! Vertical gaps wider than the threshold are absorbed by the neighbouring
//! sections rather than filled with placeholders. The sweep runs in top
//! order and tracks the running maximum bottom edge, so side-by-side
//! columns of different heights do not register as gaps. The section
//! owning that edge is the one extended downwards. Extension only grows
//! into empty bands, so merging never introduces an overlap.

use super::Section;

/// Extend sections to absorb vertical gaps. The input order is preserved.
pub fn merge_gaps(mut sections: Vec<Section>, page_height: f64, threshold: f64) -> Vec<Section> {
    let mut by_top: Vec<usize> = (0..sections.len()).collect();
    by_top.sort_by(|&a, &b| sections[a].rect.top().total_cmp(&sections[b].rect.top()));

    let Some((&first, rest)) = by_top.split_first() else {
        return sections;
    };

    if sections[first].rect.top() > threshold {
        sections[first].rect.set_top(0.0);
    }

    let mut owner = first;
    let mut max_bottom = sections[first].rect.bottom();
    for &idx in rest {
        let top = sections[idx].rect.top();
        if top - max_bottom > threshold {
            let mid = (max_bottom + top) / 2.0;
            sections[owner].rect.set_bottom(mid);
            sections[idx].rect.set_top(mid);
        }
        let bottom = sections[idx].rect.bottom();
        if bottom > max_bottom {
            max_bottom = bottom;
            owner = idx;
        }
    }

    if page_height - max_bottom > threshold {
        sections[owner].rect.set_bottom(page_height);
    }
    sections
}

//! Reading order and overlap removal.

use super::Section;
use crate::geometry::{overlap_ratio, vertical_overlap_ratio};

/// Arrange sections in reading order.
///
/// Sections are swept by (top, left). A section joins the current row when
/// its vertical overlap with the previous section exceeds `row_overlap`;
/// rows are emitted top-to-bottom and each row left-to-right.
pub fn reading_order(mut sections: Vec<Section>, row_overlap: f64) -> Vec<Section> {
    sections.sort_by(|a, b| {
        a.rect
            .top()
            .total_cmp(&b.rect.top())
            .then(a.rect.left().total_cmp(&b.rect.left()))
    });

    let mut rows: Vec<Vec<Section>> = Vec::new();
    for section in sections {
        let joins_row = rows
            .last()
            .and_then(|row| row.last())
            .is_some_and(|prev| vertical_overlap_ratio(&prev.rect, &section.rect) > row_overlap);
        match rows.last_mut() {
            Some(row) if joins_row => row.push(section),
            _ => rows.push(vec![section]),
        }
    }

    rows.into_iter()
        .flat_map(|mut row| {
            row.sort_by(|a, b| a.rect.left().total_cmp(&b.rect.left()));
            row
        })
        .collect()
}

/// Drop one section of every pair overlapping by more than `max_overlap`
/// of the smaller area. The lower-token section goes; on a tie the earlier
/// one stays. Returns the survivors (order preserved) and the number dropped.
pub fn remove_overlaps(sections: Vec<Section>, max_overlap: f64) -> (Vec<Section>, usize) {
    let mut keep = vec![true; sections.len()];
    for i in 0..sections.len() {
        if !keep[i] {
            continue;
        }
        for j in (i + 1)..sections.len() {
            if !keep[j] {
                continue;
            }
            if overlap_ratio(&sections[i].rect, &sections[j].rect) > max_overlap {
                if sections[j].tokens > sections[i].tokens {
                    keep[i] = false;
                    break;
                }
                keep[j] = false;
            }
        }
    }

    let removed = keep.iter().filter(|k| !**k).count();
    let survivors = sections
        .into_iter()
        .zip(keep)
        .filter_map(|(s, k)| k.then_some(s))
        .collect();
    (survivors, removed)
}

//! Rectangle math and token estimation.
//!
//! Everything the partitioner needs to reason about page geometry lives
//! here: the [`Rect`] value type (in CSS pixels, origin at the page's top
//! left corner), pairwise overlap measures, and the union area used for the
//! coverage invariant. Token estimates are a content-length proxy with a
//! fixed divisor of [`CHARS_PER_TOKEN`].

use serde::{Deserialize, Serialize};

/// Characters per estimated token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Tolerance for floating point comparisons on pixel coordinates.
const EPSILON: f64 = 1e-6;

/// Estimate the generation cost of `content_len` characters of content.
///
/// ```
/// use sectionforge::geometry::estimate_tokens;
/// assert_eq!(estimate_tokens(8_000), 2_000);
/// assert_eq!(estimate_tokens(3), 0);
/// ```
pub fn estimate_tokens(content_len: usize) -> usize {
    content_len / CHARS_PER_TOKEN
}

// ── Rect ───────────────────────────────────────────────────────────

/// An axis-aligned rectangle in page coordinates.
///
/// Stored as origin + size. The edge accessors ([`top`](Rect::top),
/// [`bottom`](Rect::bottom), ...) are derived, and the serialized form
/// carries all eight fields the DOM extractor emits
/// (`x, y, width, height, top, right, bottom, left`).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "RectRepr", into = "RectRepr")]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Wire shape of a [`Rect`]. Either origin/size or edges may be present on
/// input; edges fill in whatever origin/size fields are missing.
#[derive(Serialize, Deserialize)]
struct RectRepr {
    #[serde(default)]
    x: Option<f64>,
    #[serde(default)]
    y: Option<f64>,
    #[serde(default)]
    width: Option<f64>,
    #[serde(default)]
    height: Option<f64>,
    #[serde(default)]
    top: Option<f64>,
    #[serde(default)]
    right: Option<f64>,
    #[serde(default)]
    bottom: Option<f64>,
    #[serde(default)]
    left: Option<f64>,
}

impl From<RectRepr> for Rect {
    fn from(r: RectRepr) -> Self {
        let x = r.x.or(r.left).unwrap_or(0.0);
        let y = r.y.or(r.top).unwrap_or(0.0);
        let width = r
            .width
            .or_else(|| r.right.map(|right| right - x))
            .unwrap_or(0.0);
        let height = r
            .height
            .or_else(|| r.bottom.map(|bottom| bottom - y))
            .unwrap_or(0.0);
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

impl From<Rect> for RectRepr {
    fn from(r: Rect) -> Self {
        Self {
            x: Some(r.x),
            y: Some(r.y),
            width: Some(r.width),
            height: Some(r.height),
            top: Some(r.top()),
            right: Some(r.right()),
            bottom: Some(r.bottom()),
            left: Some(r.left()),
        }
    }
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn top(&self) -> f64 {
        self.y
    }

    pub fn left(&self) -> f64 {
        self.x
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Whether every coordinate is finite and the size is non-negative.
    pub fn is_well_formed(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width >= 0.0
            && self.height >= 0.0
    }

    /// Move the top edge, keeping the bottom edge where it is.
    pub fn set_top(&mut self, top: f64) {
        let bottom = self.bottom();
        self.y = top;
        self.height = (bottom - top).max(0.0);
    }

    /// Move the bottom edge, keeping the top edge where it is.
    pub fn set_bottom(&mut self, bottom: f64) {
        self.height = (bottom - self.y).max(0.0);
    }

    /// The overlapping region of two rectangles, if they overlap at all.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let left = self.left().max(other.left());
        let top = self.top().max(other.top());
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right - left <= EPSILON || bottom - top <= EPSILON {
            return None;
        }
        Some(Rect::new(left, top, right - left, bottom - top))
    }

    pub fn intersection_area(&self, other: &Rect) -> f64 {
        self.intersection(other).map_or(0.0, |r| r.area())
    }

    /// Clip this rectangle to `bounds`. Returns `None` when nothing remains.
    pub fn clip_to(&self, bounds: &Rect) -> Option<Rect> {
        self.intersection(bounds)
    }
}

// ── Overlap measures ───────────────────────────────────────────────

/// Intersection area as a fraction of the smaller rectangle's area.
///
/// Returns `0.0` when either rectangle is degenerate (zero area).
pub fn overlap_ratio(a: &Rect, b: &Rect) -> f64 {
    let smaller = a.area().min(b.area());
    if smaller <= EPSILON {
        return 0.0;
    }
    a.intersection_area(b) / smaller
}

/// Vertical intersection height as a fraction of the shorter rectangle's
/// height. Horizontal position is ignored: two side-by-side columns with
/// the same vertical extent have a ratio of `1.0`.
pub fn vertical_overlap_ratio(a: &Rect, b: &Rect) -> f64 {
    let shorter = a.height.min(b.height);
    if shorter <= EPSILON {
        return 0.0;
    }
    let overlap = a.bottom().min(b.bottom()) - a.top().max(b.top());
    overlap.max(0.0) / shorter
}

/// Area of the union of `rects`, clipped to `bounds`.
///
/// Uses a band sweep over the distinct top/bottom edges: within each
/// horizontal band the covering x-intervals are merged and summed.
pub fn union_area(rects: &[Rect], bounds: &Rect) -> f64 {
    let clipped: Vec<Rect> = rects.iter().filter_map(|r| r.clip_to(bounds)).collect();
    if clipped.is_empty() {
        return 0.0;
    }

    let mut edges: Vec<f64> = clipped
        .iter()
        .flat_map(|r| [r.top(), r.bottom()])
        .collect();
    edges.sort_by(f64::total_cmp);
    edges.dedup_by(|a, b| (*a - *b).abs() <= EPSILON);

    let mut total = 0.0;
    for band in edges.windows(2) {
        let (y0, y1) = (band[0], band[1]);
        let mut spans: Vec<(f64, f64)> = clipped
            .iter()
            .filter(|r| r.top() <= y0 + EPSILON && r.bottom() >= y1 - EPSILON)
            .map(|r| (r.left(), r.right()))
            .collect();
        if spans.is_empty() {
            continue;
        }
        spans.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut covered = 0.0;
        let (mut start, mut end) = spans[0];
        for &(s, e) in &spans[1..] {
            if s <= end {
                end = end.max(e);
            } else {
                covered += end - start;
                start = s;
                end = e;
            }
        }
        covered += end - start;
        total += covered * (y1 - y0);
    }
    total
}

/// Fraction of `bounds` covered by the union of `rects` (0.0 to 1.0).
pub fn coverage_ratio(rects: &[Rect], bounds: &Rect) -> f64 {
    let page_area = bounds.area();
    if page_area <= EPSILON {
        return 0.0;
    }
    (union_area(rects, bounds) / page_area).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_divides_by_four() {
        assert_eq!(estimate_tokens(0), 0);
        assert_eq!(estimate_tokens(40_000), 10_000);
        assert_eq!(estimate_tokens(7), 1);
    }

    #[test]
    fn edges_derive_from_origin_and_size() {
        let r = Rect::new(10.0, 20.0, 100.0, 50.0);
        assert_eq!(r.top(), 20.0);
        assert_eq!(r.bottom(), 70.0);
        assert_eq!(r.left(), 10.0);
        assert_eq!(r.right(), 110.0);
        assert_eq!(r.area(), 5000.0);
    }

    #[test]
    fn set_top_keeps_bottom() {
        let mut r = Rect::new(0.0, 100.0, 10.0, 50.0);
        r.set_top(0.0);
        assert_eq!(r.top(), 0.0);
        assert_eq!(r.bottom(), 150.0);
    }

    #[test]
    fn disjoint_rects_do_not_intersect() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(20.0, 0.0, 10.0, 10.0);
        assert!(a.intersection(&b).is_none());
        assert_eq!(overlap_ratio(&a, &b), 0.0);
    }

    #[test]
    fn touching_edges_are_not_overlap() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(0.0, 10.0, 10.0, 10.0);
        assert!(a.intersection(&b).is_none());
    }

    #[test]
    fn overlap_ratio_uses_smaller_area() {
        let big = Rect::new(0.0, 0.0, 100.0, 100.0);
        let small = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert!((overlap_ratio(&big, &small) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn vertical_overlap_ignores_horizontal_offset() {
        let left = Rect::new(0.0, 0.0, 100.0, 200.0);
        let right = Rect::new(500.0, 50.0, 100.0, 200.0);
        // 150px shared out of 200px.
        assert!((vertical_overlap_ratio(&left, &right) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn union_area_counts_overlap_once() {
        let bounds = Rect::new(0.0, 0.0, 100.0, 100.0);
        let a = Rect::new(0.0, 0.0, 60.0, 100.0);
        let b = Rect::new(40.0, 0.0, 60.0, 100.0);
        assert!((union_area(&[a, b], &bounds) - 10_000.0).abs() < 1e-6);
    }

    #[test]
    fn union_area_clips_to_bounds() {
        let bounds = Rect::new(0.0, 0.0, 100.0, 100.0);
        let a = Rect::new(-50.0, 50.0, 200.0, 100.0);
        assert!((union_area(&[a], &bounds) - 5_000.0).abs() < 1e-6);
    }

    #[test]
    fn coverage_of_empty_page_is_zero() {
        let bounds = Rect::new(0.0, 0.0, 0.0, 0.0);
        assert_eq!(coverage_ratio(&[Rect::new(0.0, 0.0, 1.0, 1.0)], &bounds), 0.0);
    }

    #[test]
    fn rect_deserializes_from_edges_only() {
        let r: Rect =
            serde_json::from_str(r#"{"top": 10, "left": 5, "right": 105, "bottom": 60}"#).unwrap();
        assert_eq!(r, Rect::new(5.0, 10.0, 100.0, 50.0));
    }

    #[test]
    fn rect_serializes_all_edges() {
        let json = serde_json::to_value(Rect::new(0.0, 10.0, 20.0, 30.0)).unwrap();
        assert_eq!(json["bottom"], 40.0);
        assert_eq!(json["right"], 20.0);
        assert_eq!(json["top"], 10.0);
    }

    #[test]
    fn malformed_rect_detected() {
        assert!(!Rect::new(f64::NAN, 0.0, 1.0, 1.0).is_well_formed());
        assert!(!Rect::new(0.0, 0.0, -1.0, 1.0).is_well_formed());
        assert!(Rect::new(0.0, 0.0, 0.0, 0.0).is_well_formed());
    }
}

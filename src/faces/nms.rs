//! Greedy non-maximum suppression.

use super::geometry::{Candidate, Face, Rect};

/// Overlap ratio used to decide that two boxes are duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlap {
    /// Intersection over union.
    Union,
    /// Intersection over the smaller of the two areas.
    Minimum,
}

impl Overlap {
    pub fn ratio(self, a: &Rect, b: &Rect) -> f32 {
        let inter = a.intersection(b);
        if inter <= 0.0 {
            return 0.0;
        }
        let (area_a, area_b) = (a.area(), b.area());
        match self {
            Overlap::Union => inter / (area_a + area_b - inter),
            Overlap::Minimum => inter / area_a.min(area_b),
        }
    }
}

/// Anything with a scored box that can go through suppression.
pub trait Scored {
    fn rect(&self) -> &Rect;

    fn score(&self) -> f32 {
        self.rect().score
    }
}

impl Scored for Rect {
    fn rect(&self) -> &Rect {
        self
    }
}

impl Scored for Candidate {
    fn rect(&self) -> &Rect {
        &self.rect
    }
}

impl Scored for Face {
    fn rect(&self) -> &Rect {
        &self.rect
    }
}

/// Keep the best-scoring boxes, dropping any box whose overlap with an
/// already kept one exceeds `threshold`.
///
/// Items are moved, never split, so anything attached to a box (landmarks,
/// regression) stays with it. Ties keep insertion order. The result is in
/// selection order.
pub fn suppress<T: Scored>(mut items: Vec<T>, threshold: f32, overlap: Overlap) -> Vec<T> {
    items.sort_by(|a, b| b.score().total_cmp(&a.score()));

    let mut suppressed = vec![false; items.len()];
    let mut keep = Vec::with_capacity(items.len());

    for i in 0..items.len() {
        if suppressed[i] {
            continue;
        }
        suppressed[i] = true;
        keep.push(i);

        let selected = *items[i].rect();
        for j in (i + 1)..items.len() {
            if suppressed[j] {
                continue;
            }
            if overlap.ratio(&selected, items[j].rect()) > threshold {
                suppressed[j] = true;
            }
        }
    }

    let mut kept = Vec::with_capacity(keep.len());
    let mut next = keep.into_iter().peekable();
    for (i, item) in items.into_iter().enumerate() {
        if next.peek() == Some(&i) {
            kept.push(item);
            next.next();
        }
    }
    kept
}

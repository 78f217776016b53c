//! Box geometry shared by every cascade stage.
//!
//! All coordinates live in the transposed pipeline frame: `x` runs along the
//! source image height and `y` along the source image width. Conversion
//! back to conventional image coordinates happens only on [`Face`].

use serde::Serialize;

/// Scored box corners. `x1 > x2` or `y1 > y2` is tolerated until squaring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
}

/// Per-box correction produced by a classifier stage.
pub type RegressionDelta = [f32; 4];

impl Rect {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Self {
        Self { x1, y1, x2, y2, score }
    }

    /// Area using the inclusive pixel convention, `(x2-x1+1)*(y2-y1+1)`.
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1 + 1.0) * (self.y2 - self.y1 + 1.0)
    }

    /// Inclusive intersection area with another box, zero when disjoint or degenerate.
    pub fn intersection(&self, other: &Rect) -> f32 {
        let left = self.x1.max(other.x1);
        let top = self.y1.max(other.y1);
        let w = self.x2.min(other.x2) - left + 1.0;
        let h = self.y2.min(other.y2) - top + 1.0;
        if w <= 0.0 || h <= 0.0 {
            return 0.0;
        }
        w * h
    }

    /// Apply a regression delta.
    ///
    /// Indices 0 and 2 scale by the x extent and move the y edges; indices 1
    /// and 3 scale by the y extent and move the x edges.
    pub fn regress(&self, delta: &RegressionDelta) -> Rect {
        let regw = self.y2 - self.y1;
        let regh = self.x2 - self.x1;
        Rect {
            x1: self.x1 + regw * delta[1],
            y1: self.y1 + regh * delta[0],
            x2: self.x2 + regw * delta[3],
            y2: self.y2 + regh * delta[2],
            score: self.score,
        }
    }

    /// Grow the shorter side to a square around the same center, floored to integers.
    pub fn to_square(&self) -> Rect {
        let h = self.x2 - self.x1;
        let w = self.y2 - self.y1;
        let side = h.max(w);
        let x1 = self.x1 + (h - side) * 0.5;
        let y1 = self.y1 + (w - side) * 0.5;
        Rect {
            x1: x1.floor(),
            y1: y1.floor(),
            x2: (x1 + side).floor(),
            y2: (y1 + side).floor(),
            score: self.score,
        }
    }

    /// Clamp into the 1-based pixel range of an image `width` x `height`.
    pub fn pad(&self, width: u32, height: u32) -> Rect {
        Rect {
            x1: self.x1.max(1.0),
            y1: self.y1.max(1.0),
            x2: self.x2.min(height as f32),
            y2: self.y2.min(width as f32),
            score: self.score,
        }
    }
}

/// A single point in the pipeline frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Five facial landmarks in classifier order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Landmarks(pub [Point; 5]);

impl Landmarks {
    pub fn points(&self) -> &[Point; 5] {
        &self.0
    }
}

/// A proposed face region with its refinement vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub rect: Rect,
    pub regression: RegressionDelta,
    pub landmarks: Option<Landmarks>,
}

impl Candidate {
    pub fn new(rect: Rect, regression: RegressionDelta) -> Self {
        Self {
            rect,
            regression,
            landmarks: None,
        }
    }

    /// The rect moved by this candidate's own regression delta.
    pub fn regressed(&self) -> Rect {
        self.rect.regress(&self.regression)
    }
}

/// Bounding box in conventional image coordinates (column, row).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// A detected face with its landmarks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Face {
    pub rect: Rect,
    pub landmarks: Landmarks,
}

impl Face {
    pub fn confidence(&self) -> f32 {
        self.rect.score
    }

    /// The face box in image coordinates.
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox {
            x: self.rect.y1 as i32,
            y: self.rect.x1 as i32,
            width: (self.rect.y2 - self.rect.y1 + 1.0) as i32,
            height: (self.rect.x2 - self.rect.x1 + 1.0) as i32,
        }
    }

    /// Landmarks as `(column, row)` image coordinates.
    pub fn image_points(&self) -> [(f32, f32); 5] {
        self.landmarks.0.map(|p| (p.y, p.x))
    }
}

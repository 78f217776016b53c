use super::geometry::{Landmarks, Point, Rect};

/// Number of landmark offsets produced per face by the output network.
pub const LANDMARK_OFFSETS: usize = 10;

/// Turn normalized output-network offsets into points inside `rect`.
///
/// The first five offsets place the points along `y`, scaled by the x extent;
/// the last five place them along `x`, scaled by the y extent.
pub fn decode_landmarks(rect: &Rect, offsets: &[f32; LANDMARK_OFFSETS]) -> Landmarks {
    let w = rect.y2 - rect.y1 + 1.0;
    let h = rect.x2 - rect.x1 + 1.0;

    Landmarks(std::array::from_fn(|k| Point {
        x: rect.x1 + offsets[k + 5] * w - 1.0,
        y: rect.y1 + offsets[k] * h - 1.0,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_landmarks() {
        let rect = Rect::new(11.0, 21.0, 50.0, 100.0, 0.9);
        // h = 40, w = 80
        let offsets = [0.0, 0.25, 0.5, 0.75, 1.0, 0.0, 0.1, 0.2, 0.3, 0.4];
        let marks = decode_landmarks(&rect, &offsets);
        let points = marks.points();

        assert!((points[0].y - 20.0).abs() < 1e-4);
        assert!((points[0].x - 10.0).abs() < 1e-4);
        assert!((points[2].y - 40.0).abs() < 1e-4);
        assert!((points[2].x - 26.0).abs() < 1e-4);
        assert!((points[4].y - 60.0).abs() < 1e-4);
        assert!((points[4].x - 42.0).abs() < 1e-4);
    }

    #[test]
    fn test_order_is_preserved() {
        let rect = Rect::new(1.0, 1.0, 10.0, 10.0, 1.0);
        let offsets = [0.9, 0.7, 0.5, 0.3, 0.1, 0.1, 0.3, 0.5, 0.7, 0.9];
        let points = decode_landmarks(&rect, &offsets).0;
        for pair in points.windows(2) {
            assert!(pair[0].y > pair[1].y);
            assert!(pair[0].x < pair[1].x);
        }
    }
}

use ndarray::ArrayView3;

use super::geometry::{Candidate, Rect};
use super::pyramid::ANCHOR_SIZE;
use super::Stage;
use crate::error::{CascadeError, Result};

/// Step between neighbouring proposal-network cells, in resized pixels.
pub const STRIDE: f32 = 2.0;

/// Output cells along one axis for a proposal-network input of `input` pixels.
pub fn feature_map_size(input: u32) -> usize {
    let cells = ((input as f32 - ANCHOR_SIZE) / STRIDE).ceil() as i64 + 1;
    cells.max(0) as usize
}

/// Decode proposal-network maps into scored candidates in source-image coordinates.
///
/// `confidence` is `[2, H, W]` with the face probability in channel 1 and
/// `regression` is `[4, H, W]`. Cells scoring at least `threshold` become
/// candidates; nothing is suppressed here.
pub fn generate_candidates(
    confidence: ArrayView3<f32>,
    regression: ArrayView3<f32>,
    input_width: u32,
    input_height: u32,
    scale: f32,
    threshold: f32,
) -> Result<Vec<Candidate>> {
    let map_w = feature_map_size(input_width);
    let map_h = feature_map_size(input_height);

    check_shape("confidence map", confidence.shape(), &[2, map_h, map_w])?;
    check_shape("regression map", regression.shape(), &[4, map_h, map_w])?;

    let faces = confidence.index_axis(ndarray::Axis(0), 1);
    let mut candidates = Vec::new();

    for ((y, x), &score) in faces.indexed_iter() {
        if !(score >= threshold) {
            continue;
        }

        let (xf, yf) = (x as f32, y as f32);
        let rect = Rect {
            x1: ((xf * STRIDE + 1.0) / scale).floor(),
            y1: ((yf * STRIDE + 1.0) / scale).floor(),
            x2: ((xf * STRIDE + ANCHOR_SIZE) / scale).floor(),
            y2: ((yf * STRIDE + ANCHOR_SIZE) / scale).floor(),
            score,
        };
        let delta = [
            regression[[0, y, x]],
            regression[[1, y, x]],
            regression[[2, y, x]],
            regression[[3, y, x]],
        ];
        candidates.push(Candidate::new(rect, delta));
    }

    Ok(candidates)
}

fn check_shape(tensor: &'static str, actual: &[usize], expected: &[usize]) -> Result<()> {
    if actual != expected {
        return Err(CascadeError::OutputShape {
            stage: Stage::Propose,
            tensor,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

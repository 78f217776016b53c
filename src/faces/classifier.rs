//! The classifier capability the cascade calls between geometry steps.
//!
//! Implementations only run inference; every decision about boxes is made by
//! the cascade itself. [`crate::faces::onnx`] provides ONNX Runtime backed
//! implementations.

use ndarray::{Array2, Array3, Array4};

use super::landmarks::LANDMARK_OFFSETS;
use super::Stage;
use crate::error::{CascadeError, Result};

/// Column of the face probability in every confidence output.
pub const FACE_CLASS: usize = 1;

/// Full-map output of the proposal network for one pyramid level.
#[derive(Debug, Clone)]
pub struct ProposalOutput {
    /// `[2, H, W]`, background then face.
    pub confidence: Array3<f32>,
    /// `[4, H, W]`.
    pub regression: Array3<f32>,
}

/// Per-crop output of the refine and output networks.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    /// `[N, 2]`, background then face.
    pub confidence: Array2<f32>,
    /// `[N, 4]`.
    pub regression: Array2<f32>,
    /// `[N, 10]`, output network only.
    pub landmarks: Option<Array2<f32>>,
}

impl BatchOutput {
    /// Check the output against a batch of `items` crops.
    pub fn validate(&self, stage: Stage, items: usize, needs_landmarks: bool) -> Result<()> {
        expect_shape(stage, "confidence", self.confidence.shape(), &[items, 2])?;
        expect_shape(stage, "regression", self.regression.shape(), &[items, 4])?;

        match (&self.landmarks, needs_landmarks) {
            (Some(marks), true) => {
                expect_shape(stage, "landmarks", marks.shape(), &[items, LANDMARK_OFFSETS])
            }
            (None, true) => Err(CascadeError::MissingOutput {
                stage,
                tensor: "landmarks",
            }),
            (_, false) => Ok(()),
        }
    }
}

/// First-stage network run over a whole resized image.
pub trait ProposalClassifier {
    /// `input` is `[1, 3, H, W]`, normalized, in the transposed pipeline frame.
    fn infer(&mut self, input: Array4<f32>) -> Result<ProposalOutput>;
}

/// Second and third stage networks run over a batch of square crops.
pub trait BatchClassifier {
    /// Side length of the square crops this network expects.
    fn input_size(&self) -> u32;

    /// `batch` is `[N, 3, S, S]` with `S == input_size()`.
    fn batch_infer(&mut self, batch: Array4<f32>) -> Result<BatchOutput>;
}

fn expect_shape(stage: Stage, tensor: &'static str, actual: &[usize], expected: &[usize]) -> Result<()> {
    if actual == expected {
        return Ok(());
    }
    Err(CascadeError::OutputShape {
        stage,
        tensor,
        expected: expected.to_vec(),
        actual: actual.to_vec(),
    })
}

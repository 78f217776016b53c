pub mod candidates;
pub mod classifier;
pub mod detector;
pub mod geometry;
pub mod landmarks;
pub mod nms;
pub mod onnx;
pub mod preprocess;
pub mod pyramid;

use std::fmt;

pub use classifier::{BatchClassifier, BatchOutput, ProposalClassifier, ProposalOutput};
pub use detector::{Cascade, DetectionParams};
pub use geometry::{BoundingBox, Candidate, Face, Landmarks, Point, Rect, RegressionDelta};
pub use nms::{suppress, Overlap, Scored};
pub use preprocess::CascadeImage;

/// The three networks of the cascade, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Full-image proposal network run over the scale pyramid.
    Propose,
    /// Refine network run over proposal crops.
    Refine,
    /// Output network producing final boxes and landmarks.
    Output,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Propose => "proposal",
            Stage::Refine => "refine",
            Stage::Output => "output",
        };
        f.write_str(name)
    }
}

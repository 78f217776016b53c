//! # facecascade
//!
//! Face and five-point landmark detection with a three-stage classifier
//! cascade: a proposal network scanned over an image pyramid, a refine network
//! over the surviving crops, and an output network producing final boxes and
//! landmarks.
//!
//! The crate owns the cascade's control flow and box geometry. Inference is
//! pluggable through [`faces::ProposalClassifier`] and
//! [`faces::BatchClassifier`]; [`faces::onnx`] implements both over ONNX
//! Runtime.
//!
//! Geometry runs on the transposed image: a [`faces::Rect`]'s `x` axis follows
//! the source image height and `y` follows its width. Use
//! [`faces::Face::bounding_box`] and [`faces::Face::image_points`] for
//! conventional image coordinates.

pub mod config;
pub mod error;
pub mod faces;
pub mod logging;

pub use error::{CascadeError, Result};
pub use faces::{Cascade, DetectionParams, Face};

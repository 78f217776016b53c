use thiserror::Error;

use crate::faces::Stage;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("Invalid detection parameters: {0}")]
    InvalidParams(String),

    #[error("{stage} classifier returned {tensor} with shape {actual:?}, expected {expected:?}")]
    OutputShape {
        stage: Stage,
        tensor: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("{stage} classifier did not return a {tensor} output")]
    MissingOutput { stage: Stage, tensor: &'static str },

    #[error("Inference error: {0}")]
    Inference(#[from] ort::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, CascadeError>;

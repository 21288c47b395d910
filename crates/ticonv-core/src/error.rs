use thiserror::Error;

/// Error type for tensor construction and indexing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TensorError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Index out of bounds: index {index} for axis {axis} with size {size}")]
    IndexOutOfBounds {
        index: usize,
        axis: usize,
        size: usize,
    },

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),
}

pub type TensorResult<T> = Result<T, TensorError>;

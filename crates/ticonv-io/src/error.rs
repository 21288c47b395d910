use thiserror::Error;
use ticonv_core::TensorError;
use ticonv_nn::TiConvError;

/// Errors from reading or writing configs and parameter files.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("layer error: {0}")]
    Layer(#[from] TiConvError),

    #[error("tensor error: {0}")]
    Tensor(#[from] TensorError),

    #[error("parameter '{0}' not found in file")]
    MissingTensor(String),
}

pub type IoResult<T> = Result<T, IoError>;

use thiserror::Error;
use ticonv_core::TensorError;

/// Errors raised by the TI convolution layer.
///
/// Everything except [`TiConvError::Tensor`] is a configuration or usage
/// error detected before any arithmetic runs.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TiConvError {
    #[error("Invalid scale {0}: must be finite and > 0")]
    InvalidScale(f64),

    #[error("Invalid rotation {0}: must be finite")]
    InvalidRotation(f64),

    #[error("At least one transformation is required")]
    EmptyTransforms,

    #[error("Invalid kernel {kernel_h}x{kernel_w}: both sides must be > 0")]
    InvalidKernel { kernel_h: usize, kernel_w: usize },

    #[error("Invalid stride {0}: must be > 0")]
    InvalidStride(usize),

    #[error("Invalid num_output {0}: must be > 0")]
    InvalidNumOutput(usize),

    #[error("Group count {groups} does not divide {what} ({channels})")]
    InvalidGroups {
        groups: usize,
        channels: usize,
        what: &'static str,
    },

    #[error("Kernel {kernel_h}x{kernel_w} does not fit padded input {in_h}x{in_w}")]
    KernelExceedsInput {
        kernel_h: usize,
        kernel_w: usize,
        in_h: usize,
        in_w: usize,
    },

    #[error("Invalid filler: {0}")]
    InvalidFiller(String),

    #[error("Invalid input shape {got:?}: {reason}")]
    InvalidInputShape { got: Vec<usize>, reason: String },

    #[error("Layer used before setup()")]
    NotSetUp,

    #[error("Argmax map shape {argmax:?} does not match gradient shape {grad:?}")]
    ArgmaxShapeMismatch { argmax: Vec<usize>, grad: Vec<usize> },

    #[error("Expected {expected} variants, got {got}")]
    VariantCountMismatch { expected: usize, got: usize },

    #[error("Argmax entry {index} refers to variant {variant}, but only {variants} exist")]
    VariantOutOfRange {
        index: usize,
        variant: usize,
        variants: usize,
    },

    #[error(transparent)]
    Tensor(#[from] TensorError),
}

pub type TiResult<T> = Result<T, TiConvError>;

//! # ticonv
//!
//! Transformation-invariant 2D convolution. Each filter bank is resampled
//! under a set of scales and rotations, every copy is convolved with the
//! input, and the layer keeps the strongest response per output element.
//!
//! ## Modules
//!
//! - **core**: Scalar trait, shapes and the dense `Tensor` used by the layer
//! - **nn**: `TIConv2D`, transform catalog, resampling, max selection, gradient routing
//! - **io**: JSON layer configs and parameter files

/// Tensor engine.
pub use ticonv_core as core;

/// The TI convolution layer and its building blocks.
pub use ticonv_nn as nn;

/// Config and parameter I/O.
pub use ticonv_io as io;

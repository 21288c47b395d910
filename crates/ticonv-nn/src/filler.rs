use serde::{Deserialize, Serialize};
use ticonv_core::{Float, Tensor};

use crate::error::{TiConvError, TiResult};

/// Initial values for weights and biases.
///
/// JSON form mirrors the usual layer-parameter files:
/// `{"type": "constant", "value": 0.1}`, `{"type": "gaussian", "std": 0.01}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Filler {
    Constant {
        #[serde(default)]
        value: f64,
    },
    Gaussian {
        #[serde(default)]
        mean: f64,
        #[serde(default = "unit")]
        std: f64,
    },
    Uniform {
        #[serde(default)]
        min: f64,
        #[serde(default = "unit")]
        max: f64,
    },
    /// Uniform in ±sqrt(3 / fan_in).
    Xavier,
}

fn unit() -> f64 {
    1.0
}

impl Filler {
    pub fn constant(value: f64) -> Self {
        Filler::Constant { value }
    }

    pub fn gaussian(mean: f64, std: f64) -> Self {
        Filler::Gaussian { mean, std }
    }

    pub fn validate(&self) -> TiResult<()> {
        match *self {
            Filler::Constant { value } if !value.is_finite() => Err(TiConvError::InvalidFiller(
                format!("constant value {value} is not finite"),
            )),
            Filler::Gaussian { mean, std } if !mean.is_finite() || !std.is_finite() || std < 0.0 => {
                Err(TiConvError::InvalidFiller(format!(
                    "gaussian needs finite mean and std >= 0, got mean {mean}, std {std}"
                )))
            }
            Filler::Uniform { min, max } if !min.is_finite() || !max.is_finite() || min > max => {
                Err(TiConvError::InvalidFiller(format!("uniform range [{min}, {max}] is empty")))
            }
            _ => Ok(()),
        }
    }

    /// A tensor of `shape` drawn from this filler.
    pub fn fill<T: Float>(&self, shape: Vec<usize>, fan_in: usize, seed: Option<u64>) -> Tensor<T> {
        match *self {
            Filler::Constant { value } => Tensor::full(shape, T::from_f64(value)),
            Filler::Gaussian { mean, std } => Tensor::randn(shape, seed)
                .mul_scalar(T::from_f64(std))
                .add_scalar(T::from_f64(mean)),
            Filler::Uniform { min, max } => Tensor::rand(shape, seed)
                .mul_scalar(T::from_f64(max - min))
                .add_scalar(T::from_f64(min)),
            Filler::Xavier => {
                let k = (3.0 / fan_in.max(1) as f64).sqrt();
                Tensor::rand(shape, seed)
                    .mul_scalar(T::from_f64(2.0 * k))
                    .add_scalar(T::from_f64(-k))
            }
        }
    }
}

impl Default for Filler {
    fn default() -> Self {
        Filler::Constant { value: 0.0 }
    }
}

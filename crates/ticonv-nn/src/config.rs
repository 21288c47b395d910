use serde::{Deserialize, Serialize};

use crate::device::Device;
use crate::error::{TiConvError, TiResult};
use crate::filler::Filler;
use crate::transform::TransformSpec;

/// Configuration of a [`TIConv2D`](crate::layer::TIConv2D) layer.
///
/// `kernel_h` / `kernel_w` override `kernel_size` per axis when set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TIConvConfig {
    pub num_output: usize,
    #[serde(default)]
    pub kernel_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_h: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_w: Option<usize>,
    #[serde(default = "one")]
    pub stride: usize,
    #[serde(default)]
    pub pad: usize,
    #[serde(default = "one")]
    pub group: usize,
    #[serde(default = "yes")]
    pub bias_term: bool,
    #[serde(default = "xavier")]
    pub weight_filler: Filler,
    #[serde(default)]
    pub bias_filler: Filler,
    #[serde(default = "identity_only")]
    pub transformations: Vec<TransformSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default)]
    pub device: Device,
}

fn one() -> usize {
    1
}

fn yes() -> bool {
    true
}

fn xavier() -> Filler {
    Filler::Xavier
}

fn identity_only() -> Vec<TransformSpec> {
    vec![TransformSpec::identity()]
}

impl TIConvConfig {
    /// Square kernel, stride 1, no padding, one group, identity only.
    pub fn new(num_output: usize, kernel_size: usize) -> Self {
        TIConvConfig {
            num_output,
            kernel_size,
            kernel_h: None,
            kernel_w: None,
            stride: 1,
            pad: 0,
            group: 1,
            bias_term: true,
            weight_filler: Filler::Xavier,
            bias_filler: Filler::default(),
            transformations: identity_only(),
            seed: None,
            device: Device::Host,
        }
    }

    pub fn with_kernel(mut self, kernel_h: usize, kernel_w: usize) -> Self {
        self.kernel_h = Some(kernel_h);
        self.kernel_w = Some(kernel_w);
        self
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_pad(mut self, pad: usize) -> Self {
        self.pad = pad;
        self
    }

    pub fn with_group(mut self, group: usize) -> Self {
        self.group = group;
        self
    }

    pub fn without_bias(mut self) -> Self {
        self.bias_term = false;
        self
    }

    pub fn with_weight_filler(mut self, filler: Filler) -> Self {
        self.weight_filler = filler;
        self
    }

    pub fn with_bias_filler(mut self, filler: Filler) -> Self {
        self.bias_filler = filler;
        self
    }

    /// Replace the transform list.
    pub fn with_transforms(mut self, transforms: Vec<TransformSpec>) -> Self {
        self.transformations = transforms;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn kernel_h(&self) -> usize {
        self.kernel_h.unwrap_or(self.kernel_size)
    }

    pub fn kernel_w(&self) -> usize {
        self.kernel_w.unwrap_or(self.kernel_size)
    }

    /// Checks that do not depend on the input shape.
    pub fn validate(&self) -> TiResult<()> {
        if self.num_output == 0 {
            return Err(TiConvError::InvalidNumOutput(self.num_output));
        }
        if self.kernel_h() == 0 || self.kernel_w() == 0 {
            return Err(TiConvError::InvalidKernel {
                kernel_h: self.kernel_h(),
                kernel_w: self.kernel_w(),
            });
        }
        if self.stride == 0 {
            return Err(TiConvError::InvalidStride(self.stride));
        }
        if self.group == 0 || self.num_output % self.group != 0 {
            return Err(TiConvError::InvalidGroups {
                groups: self.group,
                channels: self.num_output,
                what: "output channels",
            });
        }
        if self.transformations.is_empty() {
            return Err(TiConvError::EmptyTransforms);
        }
        for spec in &self.transformations {
            spec.validate()?;
        }
        self.weight_filler.validate()?;
        self.bias_filler.validate()
    }
}

pub mod config;
pub mod conv;
pub mod device;
pub mod error;
pub mod filler;
pub mod layer;
pub mod resample;
pub mod router;
pub mod select;
pub mod transform;

pub use config::TIConvConfig;
pub use conv::{ConvCore, ConvGeometry, ConvGrads, HostConv, ParallelConv};
pub use device::Device;
pub use error::{TiConvError, TiResult};
pub use filler::Filler;
pub use layer::{Layer, TIConv2D, TiActivation};
pub use resample::KernelResampler;
pub use router::{GradientRouter, TiGradients};
pub use select::{ArgmaxMap, ResponseSelector, ResponseStack};
pub use transform::{Interp, SamplingMap, TapSample, TransformCatalog, TransformKind, TransformSpec};

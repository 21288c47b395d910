use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use ticonv_core::Float;

use crate::conv::{ConvCore, HostConv, ParallelConv};

/// Execution mode of a TI layer.
///
/// `Host` runs everything on the calling thread. `Parallel` offloads the
/// per-variant and per-plane work to the rayon pool. The two modes produce
/// identical results and may be switched between forward calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Host,
    Parallel,
}

impl Device {
    /// Convolution primitive for this mode.
    pub fn conv_core<T: Float>(self) -> &'static dyn ConvCore<T> {
        match self {
            Device::Host => &HostConv,
            Device::Parallel => &ParallelConv,
        }
    }

    /// Evaluate `f` for every variant index `0..count`, results in index order.
    pub fn map_variants<R, F>(self, count: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync + Send,
    {
        match self {
            Device::Host => (0..count).map(f).collect(),
            Device::Parallel => (0..count).into_par_iter().map(f).collect(),
        }
    }
}

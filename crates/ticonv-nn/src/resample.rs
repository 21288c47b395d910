use ticonv_core::{Float, Tensor, TensorError};

use crate::device::Device;
use crate::error::TiResult;
use crate::transform::{SamplingMap, TransformCatalog};

/// Applies sampling maps to filter banks and routes gradients back.
///
/// The spatial resampling is the same for every `(out, in)` filter pair;
/// only the weight values differ. Each call reads the base bank and writes a
/// private output, so variants can be resampled concurrently.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelResampler {
    pub device: Device,
}

impl KernelResampler {
    pub fn new(device: Device) -> Self {
        KernelResampler { device }
    }

    /// Transformed filter bank: every tap is the weighted sum of its sources.
    pub fn resample<T: Float>(&self, base: &Tensor<T>, map: &SamplingMap) -> TiResult<Tensor<T>> {
        let taps = check_kernel(base, map)?;
        let weights = tap_weights::<T>(map);
        let mut out = Tensor::zeros(base.shape_vec());

        for (dst, src) in out
            .data_mut()
            .chunks_mut(taps)
            .zip(base.data().chunks(taps))
        {
            for (t, samples) in weights.iter().enumerate() {
                dst[t] = samples.iter().map(|&(s, w)| src[s] * w).sum();
            }
        }
        Ok(out)
    }

    /// Resample `base` once per variant of `catalog`, in variant order.
    pub fn resample_all<T: Float>(
        &self,
        base: &Tensor<T>,
        catalog: &TransformCatalog,
    ) -> TiResult<Vec<Tensor<T>>> {
        self.device
            .map_variants(catalog.len(), |v| self.resample(base, &catalog.maps()[v]))
            .into_iter()
            .collect()
    }

    /// Adjoint of [`resample`](Self::resample): scatter `grad` (in transformed
    /// space) back onto the source taps with the forward weights, adding into
    /// `base_grad`.
    pub fn fold_gradient<T: Float>(
        &self,
        grad: &Tensor<T>,
        map: &SamplingMap,
        base_grad: &mut Tensor<T>,
    ) -> TiResult<()> {
        let taps = check_kernel(grad, map)?;
        if grad.shape() != base_grad.shape() {
            return Err(TensorError::ShapeMismatch {
                expected: base_grad.shape_vec(),
                got: grad.shape_vec(),
            }
            .into());
        }
        let weights = tap_weights::<T>(map);

        for (dst, src) in base_grad
            .data_mut()
            .chunks_mut(taps)
            .zip(grad.data().chunks(taps))
        {
            for (t, samples) in weights.iter().enumerate() {
                for &(s, w) in samples {
                    dst[s] += src[t] * w;
                }
            }
        }
        Ok(())
    }
}

/// Sampling weights converted once to the element type.
fn tap_weights<T: Float>(map: &SamplingMap) -> Vec<Vec<(usize, T)>> {
    map.taps()
        .iter()
        .map(|samples| {
            samples
                .iter()
                .map(|s| (s.source, T::from_f64(s.weight)))
                .collect()
        })
        .collect()
}

/// Validate a `[out, in, kh, kw]` bank against the map's kernel; returns `kh * kw`.
fn check_kernel<T: Float>(bank: &Tensor<T>, map: &SamplingMap) -> TiResult<usize> {
    let (kh, kw) = map.kernel_size();
    let dims = bank.shape().dims();
    if dims.len() != 4 || dims[2] != kh || dims[3] != kw {
        let mut expected = dims.to_vec();
        expected.resize(4, 0);
        expected[2] = kh;
        expected[3] = kw;
        return Err(TensorError::ShapeMismatch {
            expected,
            got: dims.to_vec(),
        }
        .into());
    }
    Ok(kh * kw)
}

use log::debug;
use ticonv_core::{Float, Tensor};

use crate::conv::{ConvGeometry, ConvGrads};
use crate::device::Device;
use crate::error::{TiConvError, TiResult};
use crate::resample::KernelResampler;
use crate::select::ArgmaxMap;
use crate::transform::SamplingMap;

/// Gradients of one TI backward pass, in base-weight space.
#[derive(Debug, Clone)]
pub struct TiGradients<T: Float> {
    pub input: Tensor<T>,
    pub weight: Tensor<T>,
    pub bias: Tensor<T>,
}

/// Routes the upstream gradient through the variant that won each element.
#[derive(Debug, Clone, Copy, Default)]
pub struct GradientRouter {
    pub device: Device,
}

impl GradientRouter {
    pub fn new(device: Device) -> Self {
        GradientRouter { device }
    }

    /// `output_grad` where `argmax == variant`, zero elsewhere.
    pub fn mask<T: Float>(output_grad: &Tensor<T>, argmax: &ArgmaxMap, variant: usize) -> Tensor<T> {
        let mut masked = output_grad.clone();
        for (g, &idx) in masked.data_mut().iter_mut().zip(argmax.indices()) {
            if idx != variant {
                *g = T::ZERO;
            }
        }
        masked
    }

    /// Backward pass through max selection, the per-variant convolutions and
    /// the resampling.
    ///
    /// Variants are processed independently; their contributions are summed
    /// afterwards in variant order, so the result does not depend on
    /// [`Device`].
    pub fn backward<T: Float>(
        &self,
        geom: &ConvGeometry,
        output_grad: &Tensor<T>,
        argmax: &ArgmaxMap,
        banks: &[Tensor<T>],
        maps: &[SamplingMap],
        input: &Tensor<T>,
    ) -> TiResult<TiGradients<T>> {
        if argmax.shape() != output_grad.shape() {
            return Err(TiConvError::ArgmaxShapeMismatch {
                argmax: argmax.shape().to_vec(),
                grad: output_grad.shape_vec(),
            });
        }
        if banks.len() != maps.len() {
            return Err(TiConvError::VariantCountMismatch {
                expected: maps.len(),
                got: banks.len(),
            });
        }
        if let Some((index, &variant)) = argmax
            .indices()
            .iter()
            .enumerate()
            .find(|&(_, &v)| v >= banks.len())
        {
            return Err(TiConvError::VariantOutOfRange {
                index,
                variant,
                variants: banks.len(),
            });
        }

        let wins = argmax.win_counts(banks.len());
        let core = self.device.conv_core::<T>();
        let per_variant: Vec<TiResult<Option<ConvGrads<T>>>> =
            self.device.map_variants(banks.len(), |v| {
                if wins[v] == 0 {
                    return Ok(None);
                }
                let masked = Self::mask(output_grad, argmax, v);
                core.backward(geom, &masked, &banks[v], input).map(Some)
            });
        debug!("routing gradient by variant wins {:?}", wins);

        let resampler = KernelResampler::new(self.device);
        let mut grads = TiGradients {
            input: Tensor::zeros(geom.input_shape()),
            weight: Tensor::zeros(geom.weight_shape()),
            bias: Tensor::zeros(vec![geom.out_channels]),
        };
        for (v, result) in per_variant.into_iter().enumerate() {
            let Some(g) = result? else { continue };
            grads.input.add_assign(&g.input)?;
            grads.bias.add_assign(&g.bias)?;
            resampler.fold_gradient(&g.weight, &maps[v], &mut grads.weight)?;
        }
        Ok(grads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conv::{ConvCore, HostConv};
    use crate::transform::{Interp, TransformSpec};
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_mask_keeps_only_winners() {
        let grad = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![1, 1, 2, 2]).unwrap();
        let argmax = ArgmaxMap::new(vec![0, 1, 1, 2], vec![1, 1, 2, 2]).unwrap();
        assert_eq!(GradientRouter::mask(&grad, &argmax, 0).data(), &[1.0, 0.0, 0.0, 0.0]);
        assert_eq!(GradientRouter::mask(&grad, &argmax, 1).data(), &[0.0, 2.0, 3.0, 0.0]);
        assert_eq!(GradientRouter::mask(&grad, &argmax, 2).data(), &[0.0, 0.0, 0.0, 4.0]);
        assert_eq!(GradientRouter::mask(&grad, &argmax, 3).data(), &[0.0; 4]);
    }

    #[test]
    fn test_single_identity_variant_equals_plain_backward() {
        let geom = ConvGeometry::new(&[2, 2, 5, 5], 3, (3, 3), 1, 0, 1).unwrap();
        let x: Tensor<f64> = Tensor::randn(geom.input_shape(), Some(1));
        let w: Tensor<f64> = Tensor::randn(geom.weight_shape(), Some(2));
        let up: Tensor<f64> = Tensor::randn(geom.output_shape(), Some(3));
        let argmax = ArgmaxMap::new(vec![0; up.numel()], up.shape_vec()).unwrap();

        let plain = HostConv.backward(&geom, &up, &w, &x).unwrap();
        let routed = GradientRouter::default()
            .backward(&geom, &up, &argmax, &[w.clone()], &[SamplingMap::identity(3, 3)], &x)
            .unwrap();
        assert_eq!(routed.input, plain.input);
        assert_eq!(routed.weight, plain.weight);
        assert_eq!(routed.bias, plain.bias);
    }

    #[test]
    fn test_split_gradient_sums_back() {
        // Two identical identity variants splitting the elements must give the
        // same totals as one variant receiving everything.
        let geom = ConvGeometry::new(&[1, 2, 6, 6], 2, (3, 3), 1, 0, 1).unwrap();
        let x: Tensor<f64> = Tensor::randn(geom.input_shape(), Some(4));
        let w: Tensor<f64> = Tensor::randn(geom.weight_shape(), Some(5));
        let up: Tensor<f64> = Tensor::randn(geom.output_shape(), Some(6));
        let split: Vec<usize> = (0..up.numel()).map(|i| i % 2).collect();
        let argmax = ArgmaxMap::new(split, up.shape_vec()).unwrap();
        let maps = [SamplingMap::identity(3, 3), SamplingMap::identity(3, 3)];

        let routed = GradientRouter::default()
            .backward(&geom, &up, &argmax, &[w.clone(), w.clone()], &maps, &x)
            .unwrap();
        let plain = HostConv.backward(&geom, &up, &w, &x).unwrap();
        assert_abs_diff_eq!(routed.input.max_abs_diff(&plain.input).unwrap(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(routed.weight.max_abs_diff(&plain.weight).unwrap(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(routed.bias.max_abs_diff(&plain.bias).unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_losing_variant_gets_no_weight_gradient() {
        // Scale 0.5 keeps only the center tap; if it never wins, only the
        // identity variant contributes and the fold is a plain copy.
        let geom = ConvGeometry::new(&[1, 1, 4, 4], 1, (3, 3), 1, 0, 1).unwrap();
        let x: Tensor<f64> = Tensor::randn(geom.input_shape(), Some(7));
        let w: Tensor<f64> = Tensor::randn(geom.weight_shape(), Some(8));
        let up: Tensor<f64> = Tensor::ones(geom.output_shape());
        let argmax = ArgmaxMap::new(vec![0; 4], up.shape_vec()).unwrap();
        let maps = [
            SamplingMap::identity(3, 3),
            SamplingMap::build(&TransformSpec::scale(0.5).with_interp(Interp::Bilinear), 3, 3),
        ];
        let banks = [w.clone(), Tensor::zeros(geom.weight_shape())];
        let routed = GradientRouter::default()
            .backward(&geom, &up, &argmax, &banks, &maps, &x)
            .unwrap();
        let plain = HostConv.backward(&geom, &up, &w, &x).unwrap();
        assert_eq!(routed.weight, plain.weight);
    }

    #[test]
    fn test_unknown_variant_in_argmax_is_rejected() {
        // Gradient for an element won by a variant that does not exist would
        // otherwise be dropped without a trace.
        let geom = ConvGeometry::new(&[1, 1, 4, 4], 1, (3, 3), 1, 0, 1).unwrap();
        let x: Tensor<f64> = Tensor::ones(geom.input_shape());
        let w: Tensor<f64> = Tensor::ones(geom.weight_shape());
        let up: Tensor<f64> = Tensor::ones(geom.output_shape());
        let argmax = ArgmaxMap::new(vec![0, 7, 7, 7], up.shape_vec()).unwrap();
        for device in [Device::Host, Device::Parallel] {
            let err = GradientRouter::new(device)
                .backward(&geom, &up, &argmax, &[w.clone()], &[SamplingMap::identity(3, 3)], &x)
                .unwrap_err();
            assert_eq!(err, TiConvError::VariantOutOfRange { index: 1, variant: 7, variants: 1 });
        }
    }

    #[test]
    fn test_shape_and_count_checks() {
        let geom = ConvGeometry::new(&[1, 1, 4, 4], 1, (3, 3), 1, 0, 1).unwrap();
        let x: Tensor<f64> = Tensor::ones(geom.input_shape());
        let w: Tensor<f64> = Tensor::ones(geom.weight_shape());
        let up: Tensor<f64> = Tensor::ones(geom.output_shape());
        let maps = [SamplingMap::identity(3, 3)];

        let wrong = ArgmaxMap::new(vec![0; 2], vec![1, 1, 1, 2]).unwrap();
        assert!(matches!(
            GradientRouter::default().backward(&geom, &up, &wrong, &[w.clone()], &maps, &x),
            Err(TiConvError::ArgmaxShapeMismatch { .. })
        ));

        let argmax = ArgmaxMap::new(vec![0; 4], up.shape_vec()).unwrap();
        assert_eq!(
            GradientRouter::default()
                .backward(&geom, &up, &argmax, &[w.clone(), w], &maps, &x)
                .unwrap_err(),
            TiConvError::VariantCountMismatch { expected: 1, got: 2 }
        );
    }
}

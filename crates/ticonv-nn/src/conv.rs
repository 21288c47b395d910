//! Grouped direct 2D convolution, invoked once per TI variant.
//!
//! Input shape:  [batch, in_channels, height, width]
//! Weight shape: [out_channels, in_channels / groups, kH, kW]
//! Output shape: [batch, out_channels, out_h, out_w]
//! where out_h = (height + 2 * pad - kH) / stride + 1
//!
//! Both implementations share the per-plane kernels below and only differ in
//! how planes are scheduled, so their results are bit-identical.

use rayon::prelude::*;
use ticonv_core::{Float, Tensor};

use crate::error::{TiConvError, TiResult};

/// Validated shape arithmetic for one convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub batch: usize,
    pub in_channels: usize,
    pub in_h: usize,
    pub in_w: usize,
    pub out_channels: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride: usize,
    pub pad: usize,
    pub groups: usize,
    pub out_h: usize,
    pub out_w: usize,
}

impl ConvGeometry {
    pub fn new(
        input_shape: &[usize],
        out_channels: usize,
        (kernel_h, kernel_w): (usize, usize),
        stride: usize,
        pad: usize,
        groups: usize,
    ) -> TiResult<Self> {
        let &[batch, in_channels, in_h, in_w] = input_shape else {
            return Err(TiConvError::InvalidInputShape {
                got: input_shape.to_vec(),
                reason: "expected [batch, channels, height, width]".to_string(),
            });
        };
        if in_channels == 0 || in_h == 0 || in_w == 0 {
            return Err(TiConvError::InvalidInputShape {
                got: input_shape.to_vec(),
                reason: "channel and spatial sizes must be > 0".to_string(),
            });
        }
        if kernel_h == 0 || kernel_w == 0 {
            return Err(TiConvError::InvalidKernel { kernel_h, kernel_w });
        }
        if stride == 0 {
            return Err(TiConvError::InvalidStride(stride));
        }
        if out_channels == 0 {
            return Err(TiConvError::InvalidNumOutput(out_channels));
        }
        if groups == 0 || in_channels % groups != 0 {
            return Err(TiConvError::InvalidGroups {
                groups,
                channels: in_channels,
                what: "input channels",
            });
        }
        if out_channels % groups != 0 {
            return Err(TiConvError::InvalidGroups {
                groups,
                channels: out_channels,
                what: "output channels",
            });
        }
        if kernel_h > in_h + 2 * pad || kernel_w > in_w + 2 * pad {
            return Err(TiConvError::KernelExceedsInput {
                kernel_h,
                kernel_w,
                in_h: in_h + 2 * pad,
                in_w: in_w + 2 * pad,
            });
        }

        Ok(ConvGeometry {
            batch,
            in_channels,
            in_h,
            in_w,
            out_channels,
            kernel_h,
            kernel_w,
            stride,
            pad,
            groups,
            out_h: Self::out_dim(in_h, kernel_h, stride, pad),
            out_w: Self::out_dim(in_w, kernel_w, stride, pad),
        })
    }

    /// Output spatial size along one axis.
    pub fn out_dim(input_dim: usize, kernel: usize, stride: usize, pad: usize) -> usize {
        (input_dim + 2 * pad - kernel) / stride + 1
    }

    /// Same layer geometry for a different batch size.
    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch;
        self
    }

    pub fn in_per_group(&self) -> usize {
        self.in_channels / self.groups
    }

    pub fn out_per_group(&self) -> usize {
        self.out_channels / self.groups
    }

    pub fn input_shape(&self) -> Vec<usize> {
        vec![self.batch, self.in_channels, self.in_h, self.in_w]
    }

    pub fn output_shape(&self) -> Vec<usize> {
        vec![self.batch, self.out_channels, self.out_h, self.out_w]
    }

    pub fn weight_shape(&self) -> Vec<usize> {
        vec![self.out_channels, self.in_per_group(), self.kernel_h, self.kernel_w]
    }

    fn filter_len(&self) -> usize {
        self.in_per_group() * self.kernel_h * self.kernel_w
    }

    fn image_len(&self) -> usize {
        self.in_channels * self.in_h * self.in_w
    }

    fn plane_len(&self) -> usize {
        self.out_h * self.out_w
    }

    /// Input row/col read by output position `o` at kernel offset `k`, if inside.
    #[inline]
    fn source(&self, o: usize, k: usize, limit: usize) -> Option<usize> {
        let i = (o * self.stride + k) as isize - self.pad as isize;
        if i >= 0 && (i as usize) < limit {
            Some(i as usize)
        } else {
            None
        }
    }
}

/// Gradients produced by one backward call.
#[derive(Debug, Clone)]
pub struct ConvGrads<T: Float> {
    pub input: Tensor<T>,
    pub weight: Tensor<T>,
    pub bias: Tensor<T>,
}

/// Plain grouped convolution used as the per-variant primitive.
pub trait ConvCore<T: Float>: Send + Sync {
    /// Convolve `input` with `weight`, adding `bias[oc]` to every output of channel `oc`.
    fn forward(
        &self,
        geom: &ConvGeometry,
        input: &Tensor<T>,
        weight: &Tensor<T>,
        bias: Option<&Tensor<T>>,
    ) -> TiResult<Tensor<T>>;

    /// Gradients with respect to input, weight and bias for `output_grad`.
    fn backward(
        &self,
        geom: &ConvGeometry,
        output_grad: &Tensor<T>,
        weight: &Tensor<T>,
        input: &Tensor<T>,
    ) -> TiResult<ConvGrads<T>>;
}

/// Single-threaded reference implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostConv;

/// Rayon implementation: output planes, input images and filters are
/// independent tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelConv;

impl<T: Float> ConvCore<T> for HostConv {
    fn forward(
        &self,
        geom: &ConvGeometry,
        input: &Tensor<T>,
        weight: &Tensor<T>,
        bias: Option<&Tensor<T>>,
    ) -> TiResult<Tensor<T>> {
        check_forward(geom, input, weight, bias)?;
        let mut output = Tensor::zeros(geom.output_shape());
        output
            .data_mut()
            .chunks_mut(geom.plane_len())
            .enumerate()
            .for_each(|(plane, out)| {
                forward_plane(geom, input.data(), weight.data(), bias, plane, out)
            });
        Ok(output)
    }

    fn backward(
        &self,
        geom: &ConvGeometry,
        output_grad: &Tensor<T>,
        weight: &Tensor<T>,
        input: &Tensor<T>,
    ) -> TiResult<ConvGrads<T>> {
        check_backward(geom, output_grad, weight, input)?;
        let grad = output_grad.data();

        let mut input_grad = Tensor::zeros(geom.input_shape());
        input_grad
            .data_mut()
            .chunks_mut(geom.image_len())
            .enumerate()
            .for_each(|(n, out)| input_grad_image(geom, grad, weight.data(), n, out));

        let mut weight_grad = Tensor::zeros(geom.weight_shape());
        weight_grad
            .data_mut()
            .chunks_mut(geom.filter_len())
            .enumerate()
            .for_each(|(oc, out)| weight_grad_filter(geom, grad, input.data(), oc, out));

        let bias_grad: Vec<T> = (0..geom.out_channels)
            .map(|oc| bias_grad_channel(geom, grad, oc))
            .collect();

        Ok(ConvGrads {
            input: input_grad,
            weight: weight_grad,
            bias: Tensor::new(bias_grad, vec![geom.out_channels])?,
        })
    }
}

impl<T: Float> ConvCore<T> for ParallelConv {
    fn forward(
        &self,
        geom: &ConvGeometry,
        input: &Tensor<T>,
        weight: &Tensor<T>,
        bias: Option<&Tensor<T>>,
    ) -> TiResult<Tensor<T>> {
        check_forward(geom, input, weight, bias)?;
        let mut output = Tensor::zeros(geom.output_shape());
        output
            .data_mut()
            .par_chunks_mut(geom.plane_len())
            .enumerate()
            .for_each(|(plane, out)| {
                forward_plane(geom, input.data(), weight.data(), bias, plane, out)
            });
        Ok(output)
    }

    fn backward(
        &self,
        geom: &ConvGeometry,
        output_grad: &Tensor<T>,
        weight: &Tensor<T>,
        input: &Tensor<T>,
    ) -> TiResult<ConvGrads<T>> {
        check_backward(geom, output_grad, weight, input)?;
        let grad = output_grad.data();

        let mut input_grad = Tensor::zeros(geom.input_shape());
        let mut weight_grad = Tensor::zeros(geom.weight_shape());
        rayon::join(
            || {
                input_grad
                    .data_mut()
                    .par_chunks_mut(geom.image_len())
                    .enumerate()
                    .for_each(|(n, out)| input_grad_image(geom, grad, weight.data(), n, out))
            },
            || {
                weight_grad
                    .data_mut()
                    .par_chunks_mut(geom.filter_len())
                    .enumerate()
                    .for_each(|(oc, out)| weight_grad_filter(geom, grad, input.data(), oc, out))
            },
        );

        let bias_grad: Vec<T> = (0..geom.out_channels)
            .into_par_iter()
            .map(|oc| bias_grad_channel(geom, grad, oc))
            .collect();

        Ok(ConvGrads {
            input: input_grad,
            weight: weight_grad,
            bias: Tensor::new(bias_grad, vec![geom.out_channels])?,
        })
    }
}

// ─── Shape checks ───────────────────────────────────────────────────────────

fn check_shape<T: Float>(tensor: &Tensor<T>, expected: Vec<usize>) -> TiResult<()> {
    if tensor.shape().dims() != expected.as_slice() {
        return Err(ticonv_core::TensorError::ShapeMismatch {
            expected,
            got: tensor.shape_vec(),
        }
        .into());
    }
    Ok(())
}

fn check_forward<T: Float>(
    geom: &ConvGeometry,
    input: &Tensor<T>,
    weight: &Tensor<T>,
    bias: Option<&Tensor<T>>,
) -> TiResult<()> {
    check_shape(input, geom.input_shape())?;
    check_shape(weight, geom.weight_shape())?;
    if let Some(b) = bias {
        check_shape(b, vec![geom.out_channels])?;
    }
    Ok(())
}

fn check_backward<T: Float>(
    geom: &ConvGeometry,
    output_grad: &Tensor<T>,
    weight: &Tensor<T>,
    input: &Tensor<T>,
) -> TiResult<()> {
    check_shape(output_grad, geom.output_shape())?;
    check_shape(weight, geom.weight_shape())?;
    check_shape(input, geom.input_shape())
}

// ─── Kernels ────────────────────────────────────────────────────────────────

/// One output plane `plane = n * out_channels + oc`.
fn forward_plane<T: Float>(
    g: &ConvGeometry,
    input: &[T],
    weight: &[T],
    bias: Option<&Tensor<T>>,
    plane: usize,
    out: &mut [T],
) {
    let (n, oc) = (plane / g.out_channels, plane % g.out_channels);
    let icpg = g.in_per_group();
    let c0 = (oc / g.out_per_group()) * icpg;
    let filter = &weight[oc * g.filter_len()..(oc + 1) * g.filter_len()];
    let b = bias.map_or(T::ZERO, |t| t.data()[oc]);

    for oh in 0..g.out_h {
        for ow in 0..g.out_w {
            let mut sum = b;
            for icg in 0..icpg {
                let img = &input[((n * g.in_channels + c0 + icg) * g.in_h) * g.in_w..];
                for ky in 0..g.kernel_h {
                    let Some(ih) = g.source(oh, ky, g.in_h) else { continue };
                    for kx in 0..g.kernel_w {
                        let Some(iw) = g.source(ow, kx, g.in_w) else { continue };
                        sum += filter[(icg * g.kernel_h + ky) * g.kernel_w + kx] * img[ih * g.in_w + iw];
                    }
                }
            }
            out[oh * g.out_w + ow] = sum;
        }
    }
}

/// Input gradient of image `n` (all channels).
fn input_grad_image<T: Float>(g: &ConvGeometry, grad: &[T], weight: &[T], n: usize, out: &mut [T]) {
    let icpg = g.in_per_group();
    for oc in 0..g.out_channels {
        let c0 = (oc / g.out_per_group()) * icpg;
        let filter = &weight[oc * g.filter_len()..(oc + 1) * g.filter_len()];
        let plane = &grad[(n * g.out_channels + oc) * g.plane_len()..];
        for oh in 0..g.out_h {
            for ow in 0..g.out_w {
                let gv = plane[oh * g.out_w + ow];
                if gv == T::ZERO {
                    continue;
                }
                for icg in 0..icpg {
                    let base = (c0 + icg) * g.in_h * g.in_w;
                    for ky in 0..g.kernel_h {
                        let Some(ih) = g.source(oh, ky, g.in_h) else { continue };
                        for kx in 0..g.kernel_w {
                            let Some(iw) = g.source(ow, kx, g.in_w) else { continue };
                            out[base + ih * g.in_w + iw] +=
                                gv * filter[(icg * g.kernel_h + ky) * g.kernel_w + kx];
                        }
                    }
                }
            }
        }
    }
}

/// Weight gradient of filter `oc`.
fn weight_grad_filter<T: Float>(g: &ConvGeometry, grad: &[T], input: &[T], oc: usize, out: &mut [T]) {
    let icpg = g.in_per_group();
    let c0 = (oc / g.out_per_group()) * icpg;
    for n in 0..g.batch {
        let plane = &grad[(n * g.out_channels + oc) * g.plane_len()..];
        for oh in 0..g.out_h {
            for ow in 0..g.out_w {
                let gv = plane[oh * g.out_w + ow];
                if gv == T::ZERO {
                    continue;
                }
                for icg in 0..icpg {
                    let img = &input[((n * g.in_channels + c0 + icg) * g.in_h) * g.in_w..];
                    for ky in 0..g.kernel_h {
                        let Some(ih) = g.source(oh, ky, g.in_h) else { continue };
                        for kx in 0..g.kernel_w {
                            let Some(iw) = g.source(ow, kx, g.in_w) else { continue };
                            out[(icg * g.kernel_h + ky) * g.kernel_w + kx] += gv * img[ih * g.in_w + iw];
                        }
                    }
                }
            }
        }
    }
}

fn bias_grad_channel<T: Float>(g: &ConvGeometry, grad: &[T], oc: usize) -> T {
    (0..g.batch)
        .map(|n| {
            let start = (n * g.out_channels + oc) * g.plane_len();
            grad[start..start + g.plane_len()].iter().copied().sum::<T>()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn geom(input: &[usize], out: usize, k: usize, stride: usize, pad: usize, groups: usize) -> ConvGeometry {
        ConvGeometry::new(input, out, (k, k), stride, pad, groups).unwrap()
    }

    #[test]
    fn test_output_shape() {
        let g = geom(&[2, 3, 12, 10], 4, 3, 2, 0, 1);
        assert_eq!(g.output_shape(), vec![2, 4, 5, 4]);
        let g = geom(&[2, 3, 12, 10], 3, 3, 2, 0, 3);
        assert_eq!(g.output_shape(), vec![2, 3, 5, 4]);
        assert_eq!(g.weight_shape(), vec![3, 1, 3, 3]);
        let g = geom(&[1, 1, 4, 4], 1, 3, 1, 1, 1);
        assert_eq!(g.output_shape(), vec![1, 1, 4, 4]);
    }

    #[test]
    fn test_geometry_errors() {
        let bad_groups = ConvGeometry::new(&[1, 3, 5, 5], 4, (3, 3), 1, 0, 2);
        assert!(matches!(bad_groups, Err(TiConvError::InvalidGroups { what: "input channels", .. })));
        let bad_groups = ConvGeometry::new(&[1, 4, 5, 5], 3, (3, 3), 1, 0, 2);
        assert!(matches!(bad_groups, Err(TiConvError::InvalidGroups { what: "output channels", .. })));
        assert!(matches!(
            ConvGeometry::new(&[1, 1, 2, 5], 1, (3, 3), 1, 0, 1),
            Err(TiConvError::KernelExceedsInput { .. })
        ));
        assert!(ConvGeometry::new(&[1, 1, 2, 5], 1, (3, 3), 1, 1, 1).is_ok());
        assert!(matches!(
            ConvGeometry::new(&[1, 1, 5], 1, (3, 3), 1, 0, 1),
            Err(TiConvError::InvalidInputShape { .. })
        ));
        assert_eq!(
            ConvGeometry::new(&[1, 1, 5, 5], 1, (3, 3), 0, 0, 1),
            Err(TiConvError::InvalidStride(0))
        );
        assert_eq!(
            ConvGeometry::new(&[1, 1, 5, 5], 0, (3, 3), 1, 0, 1),
            Err(TiConvError::InvalidNumOutput(0))
        );
    }

    #[test]
    fn test_forward_constant() {
        let g = geom(&[2, 3, 6, 5], 4, 3, 2, 0, 1);
        let input: Tensor<f64> = Tensor::ones(g.input_shape());
        let weight: Tensor<f64> = Tensor::ones(g.weight_shape());
        let bias: Tensor<f64> = Tensor::full(vec![4], 0.1);
        let out = HostConv.forward(&g, &input, &weight, Some(&bias)).unwrap();
        assert_eq!(out.shape_vec(), vec![2, 4, 2, 2]);
        for &v in out.data() {
            assert_abs_diff_eq!(v, 27.1, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_forward_known_values() {
        // [batch=1, channels=1, H=4, W=4], 2x2 kernel picking top-left and bottom-right.
        let data: Vec<f64> = (0..16).map(|i| i as f64).collect();
        let input = Tensor::new(data, vec![1, 1, 4, 4]).unwrap();
        let weight = Tensor::new(vec![1.0, 0.0, 0.0, 1.0], vec![1, 1, 2, 2]).unwrap();
        let g = ConvGeometry::new(&[1, 1, 4, 4], 1, (2, 2), 2, 0, 1).unwrap();
        let out = HostConv.forward(&g, &input, &weight, None).unwrap();
        // 0+5, 2+7, 8+13, 10+15
        assert_eq!(out.data(), &[5.0, 9.0, 21.0, 25.0]);
    }

    #[test]
    fn test_forward_padding_zero_fills() {
        let input: Tensor<f64> = Tensor::ones(vec![1, 1, 3, 3]);
        let weight: Tensor<f64> = Tensor::ones(vec![1, 1, 3, 3]);
        let g = geom(&[1, 1, 3, 3], 1, 3, 1, 1, 1);
        let out = HostConv.forward(&g, &input, &weight, None).unwrap();
        assert_eq!(out.data(), &[4.0, 6.0, 4.0, 6.0, 9.0, 6.0, 4.0, 6.0, 4.0]);
    }

    #[test]
    fn test_grouped_forward_keeps_channels_apart() {
        let g = geom(&[2, 3, 6, 5], 3, 3, 2, 0, 3);
        let input: Tensor<f64> = Tensor::from_fn4([2, 3, 6, 5], |_, c, _, _| c as f64);
        let weight: Tensor<f64> = Tensor::ones(g.weight_shape());
        let bias: Tensor<f64> = Tensor::full(vec![3], 0.1);
        let out = HostConv.forward(&g, &input, &weight, Some(&bias)).unwrap();
        for n in 0..2 {
            for c in 0..3 {
                for h in 0..2 {
                    for w in 0..2 {
                        let v = out.get(&[n, c, h, w]).unwrap();
                        assert_abs_diff_eq!(v, 9.0 * c as f64 + 0.1, epsilon = 1e-12);
                    }
                }
            }
        }
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let g = geom(&[1, 2, 5, 5], 2, 3, 1, 0, 1);
        let input: Tensor<f64> = Tensor::ones(vec![1, 2, 5, 4]);
        let weight: Tensor<f64> = Tensor::ones(g.weight_shape());
        assert!(HostConv.forward(&g, &input, &weight, None).is_err());
        let input: Tensor<f64> = Tensor::ones(g.input_shape());
        let bias: Tensor<f64> = Tensor::ones(vec![3]);
        assert!(HostConv.forward(&g, &input, &weight, Some(&bias)).is_err());
    }

    #[test]
    fn test_backward_matches_dot_product_identity() {
        // <conv(x, w), g> is bilinear, so its gradients are exact:
        // sum(grad_w * w) = sum(grad_x * x) = <conv(x, w) - bias, g>.
        let g = geom(&[2, 4, 6, 5], 2, 3, 2, 1, 2);
        let x: Tensor<f64> = Tensor::randn(g.input_shape(), Some(1));
        let w: Tensor<f64> = Tensor::randn(g.weight_shape(), Some(2));
        let up: Tensor<f64> = Tensor::randn(g.output_shape(), Some(3));

        let y = HostConv.forward(&g, &x, &w, None).unwrap();
        let inner: f64 = y.data().iter().zip(up.data()).map(|(a, b)| a * b).sum();
        let grads = HostConv.backward(&g, &up, &w, &x).unwrap();

        let via_w: f64 = grads.weight.data().iter().zip(w.data()).map(|(a, b)| a * b).sum();
        let via_x: f64 = grads.input.data().iter().zip(x.data()).map(|(a, b)| a * b).sum();
        assert_abs_diff_eq!(via_w, inner, epsilon = 1e-9);
        assert_abs_diff_eq!(via_x, inner, epsilon = 1e-9);
        assert_abs_diff_eq!(grads.bias.sum_all(), up.sum_all(), epsilon = 1e-9);
    }

    #[test]
    fn test_parallel_matches_host() {
        let g = geom(&[3, 4, 9, 7], 6, 3, 2, 1, 2);
        let x: Tensor<f32> = Tensor::randn(g.input_shape(), Some(11));
        let w: Tensor<f32> = Tensor::randn(g.weight_shape(), Some(12));
        let b: Tensor<f32> = Tensor::randn(vec![6], Some(13));
        let up: Tensor<f32> = Tensor::randn(g.output_shape(), Some(14));

        let host = HostConv.forward(&g, &x, &w, Some(&b)).unwrap();
        let par = ParallelConv.forward(&g, &x, &w, Some(&b)).unwrap();
        assert_eq!(host, par);

        let hg = HostConv.backward(&g, &up, &w, &x).unwrap();
        let pg = ParallelConv.backward(&g, &up, &w, &x).unwrap();
        assert_eq!(hg.input, pg.input);
        assert_eq!(hg.weight, pg.weight);
        assert_eq!(hg.bias, pg.bias);
    }
}

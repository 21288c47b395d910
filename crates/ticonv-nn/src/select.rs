use ticonv_core::{Float, Shape, Tensor, TensorError};

use crate::conv::ConvGeometry;
use crate::device::Device;
use crate::error::{TiConvError, TiResult};

/// One response tensor per variant, all shaped `[batch, out, out_h, out_w]`.
pub type ResponseStack<T> = Vec<Tensor<T>>;

/// Per output element, the index of the variant that produced the maximum.
///
/// Produced by a forward pass and consumed by the matching backward pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgmaxMap {
    shape: Shape,
    indices: Vec<usize>,
}

impl ArgmaxMap {
    pub fn new(indices: Vec<usize>, shape: Vec<usize>) -> TiResult<Self> {
        let shape = Shape::new(shape);
        if indices.len() != shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![indices.len()],
            }
            .into());
        }
        Ok(ArgmaxMap { shape, indices })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn get(&self, index: &[usize]) -> TiResult<usize> {
        Ok(self.indices[self.shape.offset(index)?])
    }

    /// How many elements each of `num_variants` variants won.
    pub fn win_counts(&self, num_variants: usize) -> Vec<usize> {
        let mut counts = vec![0; num_variants];
        for &v in &self.indices {
            if v < num_variants {
                counts[v] += 1;
            }
        }
        counts
    }
}

/// Runs the per-variant convolutions and max-pools over the variant axis.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseSelector {
    pub device: Device,
}

impl ResponseSelector {
    pub fn new(device: Device) -> Self {
        ResponseSelector { device }
    }

    /// Convolve `input` with each transformed bank. The bias is added to
    /// every variant's response.
    pub fn responses<T: Float>(
        &self,
        geom: &ConvGeometry,
        input: &Tensor<T>,
        banks: &[Tensor<T>],
        bias: Option<&Tensor<T>>,
    ) -> TiResult<ResponseStack<T>> {
        let core = self.device.conv_core::<T>();
        self.device
            .map_variants(banks.len(), |v| core.forward(geom, input, &banks[v], bias))
            .into_iter()
            .collect()
    }

    /// Element-wise maximum over the stack. Ties go to the lowest variant index.
    ///
    /// Comparison is a plain `>`, so NaN never wins: a NaN in a later variant
    /// is ignored, and a NaN in variant 0 stays in the output with argmax 0
    /// (no later value compares greater than it).
    pub fn select<T: Float>(responses: &[Tensor<T>]) -> TiResult<(Tensor<T>, ArgmaxMap)> {
        let (first, rest) = responses
            .split_first()
            .ok_or(TiConvError::EmptyTransforms)?;

        let mut output = first.clone();
        let mut argmax = vec![0usize; first.numel()];

        for (v, response) in rest.iter().enumerate() {
            if response.shape() != first.shape() {
                return Err(TensorError::ShapeMismatch {
                    expected: first.shape_vec(),
                    got: response.shape_vec(),
                }
                .into());
            }
            for ((best, idx), &r) in output
                .data_mut()
                .iter_mut()
                .zip(argmax.iter_mut())
                .zip(response.data())
            {
                if r > *best {
                    *best = r;
                    *idx = v + 1;
                }
            }
        }

        let argmax = ArgmaxMap::new(argmax, first.shape_vec())?;
        Ok((output, argmax))
    }

    /// Full TI forward: per-variant responses followed by max selection.
    pub fn forward<T: Float>(
        &self,
        geom: &ConvGeometry,
        input: &Tensor<T>,
        banks: &[Tensor<T>],
        bias: Option<&Tensor<T>>,
    ) -> TiResult<(Tensor<T>, ArgmaxMap)> {
        let responses = self.responses(geom, input, banks, bias)?;
        Self::select(&responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(values: &[f64]) -> Tensor<f64> {
        Tensor::new(values.to_vec(), vec![1, 1, 1, values.len()]).unwrap()
    }

    #[test]
    fn test_select_max_and_argmax() {
        let stack = vec![t(&[1.0, 5.0, -2.0, 0.0]), t(&[3.0, 4.0, -1.0, 0.0]), t(&[2.0, 6.0, -3.0, 0.5])];
        let (out, argmax) = ResponseSelector::select(&stack).unwrap();
        assert_eq!(out.data(), &[3.0, 6.0, -1.0, 0.5]);
        assert_eq!(argmax.indices(), &[1, 2, 1, 2]);
        assert_eq!(argmax.win_counts(3), vec![0, 2, 2]);
    }

    #[test]
    fn test_ties_go_to_lowest_index() {
        let stack = vec![t(&[1.0, 2.0]), t(&[1.0, 3.0]), t(&[1.0, 3.0])];
        let (out, argmax) = ResponseSelector::select(&stack).unwrap();
        assert_eq!(out.data(), &[1.0, 3.0]);
        assert_eq!(argmax.indices(), &[0, 1]);
    }

    #[test]
    fn test_nan_never_wins() {
        let stack = vec![t(&[f64::NAN, 1.0]), t(&[5.0, f64::NAN]), t(&[6.0, 0.5])];
        let (out, argmax) = ResponseSelector::select(&stack).unwrap();
        assert!(out.data()[0].is_nan());
        assert_eq!(out.data()[1], 1.0);
        assert_eq!(argmax.indices(), &[0, 0]);
    }

    #[test]
    fn test_single_variant_passthrough() {
        let stack = vec![t(&[-1.0, 7.0])];
        let (out, argmax) = ResponseSelector::select(&stack).unwrap();
        assert_eq!(out, stack[0]);
        assert_eq!(argmax.indices(), &[0, 0]);
    }

    #[test]
    fn test_select_rejects_bad_stacks() {
        assert_eq!(
            ResponseSelector::select::<f64>(&[]).unwrap_err(),
            TiConvError::EmptyTransforms
        );
        assert!(ResponseSelector::select(&[t(&[1.0]), t(&[1.0, 2.0])]).is_err());
    }

    #[test]
    fn test_argmax_map_indexing() {
        let map = ArgmaxMap::new(vec![0, 1, 2, 1], vec![1, 2, 1, 2]).unwrap();
        assert_eq!(map.get(&[0, 1, 0, 0]).unwrap(), 2);
        assert!(map.get(&[0, 2, 0, 0]).is_err());
        assert!(ArgmaxMap::new(vec![0], vec![1, 2, 1, 1]).is_err());
    }

    #[test]
    fn test_forward_picks_strongest_bank() {
        let geom = ConvGeometry::new(&[1, 1, 3, 3], 1, (3, 3), 1, 0, 1).unwrap();
        let input: Tensor<f64> = Tensor::ones(vec![1, 1, 3, 3]);
        let banks = vec![
            Tensor::full(vec![1, 1, 3, 3], 0.5),
            Tensor::full(vec![1, 1, 3, 3], 2.0),
            Tensor::full(vec![1, 1, 3, 3], -1.0),
        ];
        let bias = Tensor::full(vec![1], 1.0);
        for device in [Device::Host, Device::Parallel] {
            let (out, argmax) = ResponseSelector::new(device)
                .forward(&geom, &input, &banks, Some(&bias))
                .unwrap();
            assert_eq!(out.data(), &[19.0]);
            assert_eq!(argmax.indices(), &[1]);
        }
    }
}

use log::{debug, info};
use ticonv_core::{Float, Tensor, TensorError};

use crate::config::TIConvConfig;
use crate::conv::ConvGeometry;
use crate::device::Device;
use crate::error::{TiConvError, TiResult};
use crate::resample::KernelResampler;
use crate::router::GradientRouter;
use crate::select::{ArgmaxMap, ResponseSelector};
use crate::transform::TransformCatalog;

/// Trait for a layer with explicit forward and backward passes.
pub trait Layer<T: Float> {
    /// What a forward pass hands to the matching backward pass.
    type Activation;

    /// Validate against `input_shape`, initialize parameters, return the output shape.
    fn setup(&mut self, input_shape: &[usize]) -> TiResult<Vec<usize>>;
    /// Forward pass.
    fn forward(&self, input: &Tensor<T>) -> TiResult<Self::Activation>;
    /// Backward pass: returns the input gradient and accumulates parameter gradients.
    fn backward(
        &mut self,
        input: &Tensor<T>,
        activation: &Self::Activation,
        output_grad: &Tensor<T>,
    ) -> TiResult<Tensor<T>>;
    /// Return all trainable parameters.
    fn parameters(&self) -> Vec<&Tensor<T>>;
    /// Accumulated gradients, in the order of [`parameters`](Self::parameters).
    fn gradients(&self) -> Vec<&Tensor<T>>;
}

/// Result of a TI forward pass.
///
/// Holds the output, the winning variant per output element and the
/// transformed filter banks that produced them. Pass it back to
/// [`TIConv2D::backward`] together with the same input.
#[derive(Debug, Clone)]
pub struct TiActivation<T: Float> {
    pub output: Tensor<T>,
    pub argmax: ArgmaxMap,
    banks: Vec<Tensor<T>>,
}

impl<T: Float> TiActivation<T> {
    /// Transformed filter banks, one per variant.
    pub fn banks(&self) -> &[Tensor<T>] {
        &self.banks
    }
}

/// Transformation-invariant 2D convolution.
///
/// Input shape:  [batch, in_channels, height, width]
/// Output shape: [batch, num_output, out_h, out_w]
/// where out_h = (height + 2 * pad - kernel_h) / stride + 1
///
/// Every configured transform yields a resampled copy of the filter bank;
/// the output keeps, per element, the largest response over those copies.
pub struct TIConv2D<T: Float> {
    config: TIConvConfig,
    catalog: TransformCatalog,
    device: Device,
    geometry: Option<ConvGeometry>,
    weight: Tensor<T>, // [num_output, in_channels / group, kH, kW]
    bias: Option<Tensor<T>>, // [num_output]
    weight_grad: Tensor<T>,
    bias_grad: Option<Tensor<T>>,
}

impl<T: Float> TIConv2D<T> {
    /// Validate `config` and build the transform catalog. Parameters are
    /// allocated by [`setup`](Layer::setup).
    pub fn new(config: TIConvConfig) -> TiResult<Self> {
        config.validate()?;
        let catalog = TransformCatalog::new(
            config.transformations.clone(),
            config.kernel_h(),
            config.kernel_w(),
        )?;
        Ok(TIConv2D {
            device: config.device,
            config,
            catalog,
            geometry: None,
            weight: Tensor::zeros(vec![0]),
            bias: None,
            weight_grad: Tensor::zeros(vec![0]),
            bias_grad: None,
        })
    }

    pub fn config(&self) -> &TIConvConfig {
        &self.config
    }

    pub fn catalog(&self) -> &TransformCatalog {
        &self.catalog
    }

    /// Number of variants, K + 1.
    pub fn num_variants(&self) -> usize {
        self.catalog.len()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Switch execution mode; takes effect on the next call.
    pub fn set_device(&mut self, device: Device) {
        self.device = device;
    }

    pub fn weight(&self) -> &Tensor<T> {
        &self.weight
    }

    pub fn weight_mut(&mut self) -> &mut Tensor<T> {
        &mut self.weight
    }

    pub fn bias(&self) -> Option<&Tensor<T>> {
        self.bias.as_ref()
    }

    pub fn bias_mut(&mut self) -> Option<&mut Tensor<T>> {
        self.bias.as_mut()
    }

    pub fn weight_grad(&self) -> &Tensor<T> {
        &self.weight_grad
    }

    pub fn bias_grad(&self) -> Option<&Tensor<T>> {
        self.bias_grad.as_ref()
    }

    /// Replace the base filter bank; the shape must match the one from setup.
    pub fn set_weight(&mut self, weight: Tensor<T>) -> TiResult<()> {
        let geom = self.geometry.ok_or(TiConvError::NotSetUp)?;
        if weight.shape_vec() != geom.weight_shape() {
            return Err(TensorError::ShapeMismatch {
                expected: geom.weight_shape(),
                got: weight.shape_vec(),
            }
            .into());
        }
        self.weight = weight;
        Ok(())
    }

    /// Clear accumulated parameter gradients.
    pub fn zero_grad(&mut self) {
        self.weight_grad.fill_zero();
        if let Some(g) = self.bias_grad.as_mut() {
            g.fill_zero();
        }
    }

    /// Output shape for an input of `input_shape` with the configured parameters.
    pub fn output_shape(&self, input_shape: &[usize]) -> TiResult<Vec<usize>> {
        Ok(self.geometry_for(input_shape)?.output_shape())
    }

    /// Geometry for one call; batch and spatial size may differ from setup,
    /// channels may not.
    fn geometry_for(&self, input_shape: &[usize]) -> TiResult<ConvGeometry> {
        let configured = self.geometry.ok_or(TiConvError::NotSetUp)?;
        let geom = ConvGeometry::new(
            input_shape,
            self.config.num_output,
            (self.config.kernel_h(), self.config.kernel_w()),
            self.config.stride,
            self.config.pad,
            self.config.group,
        )?;
        if geom.in_channels != configured.in_channels {
            return Err(TiConvError::InvalidInputShape {
                got: input_shape.to_vec(),
                reason: format!("layer was set up for {} channels", configured.in_channels),
            });
        }
        Ok(geom)
    }
}

impl<T: Float> Layer<T> for TIConv2D<T> {
    type Activation = TiActivation<T>;

    fn setup(&mut self, input_shape: &[usize]) -> TiResult<Vec<usize>> {
        let geom = ConvGeometry::new(
            input_shape,
            self.config.num_output,
            (self.config.kernel_h(), self.config.kernel_w()),
            self.config.stride,
            self.config.pad,
            self.config.group,
        )?;

        let fan_in = geom.in_per_group() * geom.kernel_h * geom.kernel_w;
        let seed = self.config.seed;
        self.weight = self.config.weight_filler.fill(geom.weight_shape(), fan_in, seed);
        self.weight_grad = Tensor::zeros(geom.weight_shape());
        if self.config.bias_term {
            let bias_seed = seed.map(|s| s.wrapping_add(1));
            self.bias = Some(self.config.bias_filler.fill(vec![geom.out_channels], fan_in, bias_seed));
            self.bias_grad = Some(Tensor::zeros(vec![geom.out_channels]));
        } else {
            self.bias = None;
            self.bias_grad = None;
        }
        self.geometry = Some(geom);

        info!(
            "TIConv2D setup: input {:?} -> output {:?}, kernel {}x{}, stride {}, pad {}, group {}, {} variants {:?}",
            geom.input_shape(),
            geom.output_shape(),
            geom.kernel_h,
            geom.kernel_w,
            geom.stride,
            geom.pad,
            geom.groups,
            self.catalog.len(),
            self.catalog.specs(),
        );
        Ok(geom.output_shape())
    }

    fn forward(&self, input: &Tensor<T>) -> TiResult<TiActivation<T>> {
        let geom = self.geometry_for(input.shape().dims())?;
        let banks = KernelResampler::new(self.device).resample_all(&self.weight, &self.catalog)?;
        let (output, argmax) =
            ResponseSelector::new(self.device).forward(&geom, input, &banks, self.bias.as_ref())?;
        debug!("TIConv2D forward wins per variant: {:?}", argmax.win_counts(banks.len()));
        Ok(TiActivation { output, argmax, banks })
    }

    fn backward(
        &mut self,
        input: &Tensor<T>,
        activation: &TiActivation<T>,
        output_grad: &Tensor<T>,
    ) -> TiResult<Tensor<T>> {
        let geom = self.geometry_for(input.shape().dims())?;
        if output_grad.shape_vec() != geom.output_shape() {
            return Err(TensorError::ShapeMismatch {
                expected: geom.output_shape(),
                got: output_grad.shape_vec(),
            }
            .into());
        }

        let grads = GradientRouter::new(self.device).backward(
            &geom,
            output_grad,
            &activation.argmax,
            &activation.banks,
            self.catalog.maps(),
            input,
        )?;

        self.weight_grad.add_assign(&grads.weight)?;
        if let Some(bias_grad) = self.bias_grad.as_mut() {
            bias_grad.add_assign(&grads.bias)?;
        }
        Ok(grads.input)
    }

    fn parameters(&self) -> Vec<&Tensor<T>> {
        let mut params = vec![&self.weight];
        params.extend(self.bias.as_ref());
        params
    }

    fn gradients(&self) -> Vec<&Tensor<T>> {
        let mut grads = vec![&self.weight_grad];
        grads.extend(self.bias_grad.as_ref());
        grads
    }
}

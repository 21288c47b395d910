use std::fs;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};
use ticonv_core::{Float, Tensor, TensorError};
use ticonv_nn::TIConv2D;

use crate::error::{IoError, IoResult};

/// Named parameter tensors, stored as f64 regardless of the layer's precision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelWeights {
    pub tensors: Vec<(String, Vec<f64>, Vec<usize>)>, // (name, data, shape)
}

impl ModelWeights {
    pub fn new() -> Self {
        ModelWeights { tensors: Vec::new() }
    }

    pub fn add<T: Float>(&mut self, name: &str, tensor: &Tensor<T>) {
        self.tensors.push((
            name.to_string(),
            tensor.data().iter().map(|v| v.to_f64()).collect(),
            tensor.shape_vec(),
        ));
    }

    pub fn get<T: Float>(&self, name: &str) -> IoResult<Tensor<T>> {
        let (_, data, shape) = self
            .tensors
            .iter()
            .find(|(n, _, _)| n == name)
            .ok_or_else(|| IoError::MissingTensor(name.to_string()))?;
        let data = data.iter().map(|&v| T::from_f64(v)).collect();
        Ok(Tensor::new(data, shape.clone())?)
    }

    /// Snapshot of a layer's `weight` and, if present, `bias`.
    pub fn from_layer<T: Float>(layer: &TIConv2D<T>) -> Self {
        let mut weights = ModelWeights::new();
        weights.add("weight", layer.weight());
        if let Some(bias) = layer.bias() {
            weights.add("bias", bias);
        }
        weights
    }

    /// Copy the stored parameters into a layer that has been set up.
    pub fn apply_to<T: Float>(&self, layer: &mut TIConv2D<T>) -> IoResult<()> {
        layer.set_weight(self.get("weight")?)?;
        if let Some(bias) = layer.bias_mut() {
            let stored: Tensor<T> = self.get("bias")?;
            if stored.shape() != bias.shape() {
                return Err(TensorError::ShapeMismatch {
                    expected: bias.shape_vec(),
                    got: stored.shape_vec(),
                }
                .into());
            }
            *bias = stored;
        }
        Ok(())
    }
}

/// Save a layer's parameters to a JSON file.
pub fn save_weights<T: Float, P: AsRef<Path>>(layer: &TIConv2D<T>, path: P) -> IoResult<()> {
    let json = serde_json::to_string_pretty(&ModelWeights::from_layer(layer))?;
    fs::write(path, json)?;
    Ok(())
}

/// Load parameters from a JSON file into a layer that has been set up.
pub fn load_weights<T: Float, P: AsRef<Path>>(layer: &mut TIConv2D<T>, path: P) -> IoResult<()> {
    let path = path.as_ref();
    let json = fs::read_to_string(path)?;
    let weights: ModelWeights = serde_json::from_str(&json)?;
    weights.apply_to(layer)?;
    debug!("loaded TI parameters from {}", path.display());
    Ok(())
}

//! Model contract: a GNN is an opaque callable over message-flow blocks
//! that owns named parameters and can snapshot and restore them.

use crate::error::MlError;
use crate::loader::batch::Block;
use ndarray::{Array2, ArrayD};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Training mode enables train-time-only behavior (dropout, running
/// statistics updates). Evaluation mode must leave parameters and buffers
/// untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelMode {
    Train,
    Eval,
}

/// A trainable tensor and its accumulated gradient.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub value: ArrayD<f32>,
    pub grad: ArrayD<f32>,
}

impl Parameter {
    pub fn new(value: ArrayD<f32>) -> Self {
        let grad = ArrayD::zeros(value.raw_dim());
        Self { value, grad }
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }
}

/// Named parameters plus non-trainable buffers.
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    params: BTreeMap<String, Parameter>,
    buffers: BTreeMap<String, ArrayD<f32>>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ArrayD<f32>) {
        self.params.insert(name.into(), Parameter::new(value));
    }

    pub fn insert_buffer(&mut self, name: impl Into<String>, value: ArrayD<f32>) {
        self.buffers.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params.get_mut(name)
    }

    pub fn buffer(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.buffers.get(name)
    }

    pub fn buffer_mut(&mut self, name: &str) -> Option<&mut ArrayD<f32>> {
        self.buffers.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Parameter)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Parameter)> {
        self.params.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Total number of trainable scalars.
    pub fn num_elements(&self) -> usize {
        self.params.values().map(|p| p.value.len()).sum()
    }

    pub fn zero_grad(&mut self) {
        for param in self.params.values_mut() {
            param.zero_grad();
        }
    }

    /// Independent copy of all values; later updates do not reach it.
    pub fn snapshot(&self) -> ModelState {
        ModelState {
            params: self
                .params
                .iter()
                .map(|(k, p)| (k.clone(), p.value.clone()))
                .collect(),
            buffers: self.buffers.clone(),
        }
    }

    /// Overwrite values from a snapshot with the same names and shapes.
    /// Gradients are cleared.
    pub fn restore(&mut self, state: &ModelState) -> Result<(), MlError> {
        if state.params.len() != self.params.len() || state.buffers.len() != self.buffers.len() {
            return Err(MlError::model(format!(
                "snapshot has {} parameters and {} buffers, model has {} and {}",
                state.params.len(),
                state.buffers.len(),
                self.params.len(),
                self.buffers.len()
            )));
        }
        for (name, param) in &mut self.params {
            let value = state
                .params
                .get(name)
                .ok_or_else(|| MlError::model(format!("snapshot is missing parameter '{name}'")))?;
            if value.shape() != param.value.shape() {
                return Err(MlError::model(format!(
                    "parameter '{name}' has shape {:?}, snapshot has {:?}",
                    param.value.shape(),
                    value.shape()
                )));
            }
            param.value.assign(value);
            param.zero_grad();
        }
        for (name, buffer) in &mut self.buffers {
            let value = state
                .buffers
                .get(name)
                .ok_or_else(|| MlError::model(format!("snapshot is missing buffer '{name}'")))?;
            if value.shape() != buffer.shape() {
                return Err(MlError::model(format!("buffer '{name}' changed shape")));
            }
            buffer.assign(value);
        }
        Ok(())
    }
}

/// Serializable snapshot of a model's parameters and buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub params: BTreeMap<String, ArrayD<f32>>,
    #[serde(default)]
    pub buffers: BTreeMap<String, ArrayD<f32>>,
}

/// A node-classification GNN.
///
/// `forward` maps a batch's blocks and input features to one logit row per
/// output node of the last block. In [`ModelMode::Train`] it may cache what
/// `backward` needs; `backward` then accumulates parameter gradients from the
/// gradient of the loss with respect to the logits.
pub trait GnnModel: Send {
    fn name(&self) -> &str;

    fn set_mode(&mut self, mode: ModelMode);

    fn mode(&self) -> ModelMode;

    fn forward(&mut self, blocks: &[Block], features: &Array2<f32>) -> Result<Array2<f32>, MlError>;

    fn backward(&mut self, grad_logits: &Array2<f32>) -> Result<(), MlError>;

    fn parameters(&self) -> &ParameterSet;

    fn parameters_mut(&mut self) -> &mut ParameterSet;

    /// Re-initialize parameters deterministically from `seed`.
    fn reset_parameters(&mut self, _seed: u64) {}

    fn state_dict(&self) -> ModelState {
        self.parameters().snapshot()
    }

    fn load_state_dict(&mut self, state: &ModelState) -> Result<(), MlError> {
        self.parameters_mut().restore(state)
    }
}

/// Minimal one-layer models for unit tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use ndarray::{Array1, Axis, Ix2};

    /// Mean-aggregating linear layer: `logits = W · mean(h_neighbors ∪ h_self) + b`.
    pub struct MeanLinear {
        params: ParameterSet,
        mode: ModelMode,
        cache: Option<Array2<f32>>,
    }

    impl MeanLinear {
        pub fn new(in_dim: usize, out_dim: usize) -> Self {
            let mut params = ParameterSet::new();
            params.insert("weight", ArrayD::zeros(vec![in_dim, out_dim]));
            params.insert("bias", ArrayD::zeros(vec![out_dim]));
            Self {
                params,
                mode: ModelMode::Train,
                cache: None,
            }
        }

        fn aggregate(block: &Block, features: &Array2<f32>) -> Array2<f32> {
            let mut out = features.slice(ndarray::s![..block.num_dst, ..]).to_owned();
            let mut counts = vec![1.0f32; block.num_dst];
            for (&s, &d) in block.edge_src.iter().zip(&block.edge_dst) {
                let row = features.row(s).to_owned();
                let mut target = out.row_mut(d);
                target += &row;
                counts[d] += 1.0;
            }
            for (mut row, c) in out.axis_iter_mut(Axis(0)).zip(counts) {
                row.mapv_inplace(|v| v / c);
            }
            out
        }
    }

    impl GnnModel for MeanLinear {
        fn name(&self) -> &str {
            "mean-linear"
        }

        fn set_mode(&mut self, mode: ModelMode) {
            self.mode = mode;
        }

        fn mode(&self) -> ModelMode {
            self.mode
        }

        fn forward(&mut self, blocks: &[Block], features: &Array2<f32>) -> Result<Array2<f32>, MlError> {
            let mut h = features.clone();
            for block in blocks {
                h = Self::aggregate(block, &h);
            }
            let weight = self.params.get("weight").map(|p| p.value.clone());
            let bias = self.params.get("bias").map(|p| p.value.clone());
            let (Some(weight), Some(bias)) = (weight, bias) else {
                return Err(MlError::model("missing parameters"));
            };
            let weight = weight
                .into_dimensionality::<Ix2>()
                .map_err(|e| MlError::model(e.to_string()))?;
            let bias: Array1<f32> = bias
                .into_dimensionality()
                .map_err(|e| MlError::model(e.to_string()))?;
            let logits = h.dot(&weight) + &bias;
            self.cache = (self.mode == ModelMode::Train).then_some(h);
            Ok(logits)
        }

        fn backward(&mut self, grad_logits: &Array2<f32>) -> Result<(), MlError> {
            let h = self
                .cache
                .take()
                .ok_or_else(|| MlError::model("backward without a training forward pass"))?;
            let grad_w = h.t().dot(grad_logits).into_dyn();
            let grad_b = grad_logits.sum_axis(Axis(0)).into_dyn();
            if let Some(p) = self.params.get_mut("weight") {
                p.grad += &grad_w;
            }
            if let Some(p) = self.params.get_mut("bias") {
                p.grad += &grad_b;
            }
            Ok(())
        }

        fn parameters(&self) -> &ParameterSet {
            &self.params
        }

        fn parameters_mut(&mut self) -> &mut ParameterSet {
            &mut self.params
        }
    }
}

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use ndarray::{Array1, Array2, ArrayD, Axis, Ix2, s};
use sagebench_ml::{Block, Graph, GnnModel, MlError, ModelMode, NodeLabels, ParameterSet, SplitMask};

/// Linear read-out of the seed nodes' own input features.
///
/// Seeds are the first rows of the input features, so the model ignores
/// the edges and only exercises the training plumbing.
pub struct LinearProbe {
    params: ParameterSet,
    mode: ModelMode,
    cache: Option<Array2<f32>>,
}

impl LinearProbe {
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

    fn weights(&self) -> Result<(Array2<f32>, Array1<f32>), MlError> {
        let get = |name: &str| {
            self.params
                .get(name)
                .map(|p| p.value.clone())
                .ok_or_else(|| MlError::model(format!("missing parameter {name}")))
        };
        let weight = get("weight")?
            .into_dimensionality::<Ix2>()
            .map_err(|e| MlError::model(e.to_string()))?;
        let bias = get("bias")?
            .into_dimensionality()
            .map_err(|e| MlError::model(e.to_string()))?;
        Ok((weight, bias))
    }
}

impl GnnModel for LinearProbe {
    fn name(&self) -> &str {
        "linear-probe"
    }

    fn set_mode(&mut self, mode: ModelMode) {
        self.mode = mode;
    }

    fn mode(&self) -> ModelMode {
        self.mode
    }

    fn forward(&mut self, blocks: &[Block], features: &Array2<f32>) -> Result<Array2<f32>, MlError> {
        let seeds = blocks
            .last()
            .map(|b| b.num_dst)
            .ok_or_else(|| MlError::model("no blocks"))?;
        let x = features.slice(s![..seeds, ..]).to_owned();
        let (weight, bias) = self.weights()?;
        let logits = x.dot(&weight) + &bias;
        self.cache = (self.mode == ModelMode::Train).then_some(x);
        Ok(logits)
    }

    fn backward(&mut self, grad_logits: &Array2<f32>) -> Result<(), MlError> {
        let x = self
            .cache
            .take()
            .ok_or_else(|| MlError::model("backward without forward"))?;
        if let Some(p) = self.params.get_mut("weight") {
            p.grad += &x.t().dot(grad_logits).into_dyn();
        }
        if let Some(p) = self.params.get_mut("bias") {
            p.grad += &grad_logits.sum_axis(Axis(0)).into_dyn();
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

/// Path graph over `n` nodes with one-hot features of `i % 2` and that as
/// the label. `assign[i]` puts node `i` in train (0), val (1), test (2) or
/// no split (3).
pub fn path_graph(n: usize, assign: &[u8]) -> Graph {
    let edges = (1..n).flat_map(|i| [(i - 1, i), (i, i - 1)]).collect();
    let features = Array2::from_shape_fn((n, 2), |(i, j)| if i % 2 == j { 1.0 } else { 0.0 });
    let mask = |k: u8| assign.iter().map(|&a| a == k).collect::<Vec<_>>();
    Graph::new(n, edges, features, NodeLabels::Single((0..n).map(|i| i % 2).collect()))
        .and_then(|g| g.with_mask(SplitMask::Train, mask(0)))
        .and_then(|g| g.with_mask(SplitMask::Val, mask(1)))
        .and_then(|g| g.with_mask(SplitMask::Test, mask(2)))
        .expect("valid fixture graph")
}

/// Arbitrary directed graph on `n` nodes with the given split assignment.
pub fn graph_with_edges(n: usize, edges: Vec<(usize, usize)>, assign: &[u8]) -> Graph {
    let features = Array2::from_shape_fn((n, 1), |(i, _)| i as f32);
    let mask = |k: u8| assign.iter().map(|&a| a == k).collect::<Vec<_>>();
    Graph::new(n, edges, features, NodeLabels::Single(vec![0; n]))
        .and_then(|g| g.with_mask(SplitMask::Train, mask(0)))
        .and_then(|g| g.with_mask(SplitMask::Val, mask(1)))
        .and_then(|g| g.with_mask(SplitMask::Test, mask(2)))
        .expect("valid fixture graph")
}

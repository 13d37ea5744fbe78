//! Loss functions over logits.

use crate::data::graph::{Graph, NodeLabels, SplitMask};
use crate::error::MlError;
use ndarray::{Array1, Array2, Axis};
use sagebench_core::TaskType;

/// Mean loss over a batch and its gradient with respect to the logits.
#[derive(Debug, Clone)]
pub struct LossOutput {
    pub value: f64,
    pub grad: Array2<f32>,
}

pub trait LossFn: Send + Sync {
    fn name(&self) -> &str;

    fn compute(&self, logits: &Array2<f32>, targets: &NodeLabels) -> Result<LossOutput, MlError>;
}

fn check_rows(logits: &Array2<f32>, targets: &NodeLabels) -> Result<(), MlError> {
    if logits.nrows() != targets.len() {
        return Err(MlError::training(format!(
            "{} logit rows for {} targets",
            logits.nrows(),
            targets.len()
        )));
    }
    if logits.nrows() == 0 {
        return Err(MlError::training("loss over an empty batch"));
    }
    Ok(())
}

/// Softmax cross-entropy for single-label targets.
#[derive(Debug, Clone, Default)]
pub struct CrossEntropyLoss;

impl LossFn for CrossEntropyLoss {
    fn name(&self) -> &str {
        "cross_entropy"
    }

    fn compute(&self, logits: &Array2<f32>, targets: &NodeLabels) -> Result<LossOutput, MlError> {
        check_rows(logits, targets)?;
        let NodeLabels::Single(labels) = targets else {
            return Err(MlError::training("cross-entropy needs single-label targets"));
        };
        let n = logits.nrows() as f64;
        let num_classes = logits.ncols();
        let mut grad = Array2::zeros(logits.raw_dim());
        let mut total = 0.0f64;

        for ((row, mut grad_row), &label) in logits.outer_iter().zip(grad.outer_iter_mut()).zip(labels) {
            if label >= num_classes {
                return Err(MlError::training(format!(
                    "label {label} out of range for {num_classes} logits"
                )));
            }
            let max = row.iter().fold(f64::NEG_INFINITY, |m, &v| m.max(f64::from(v)));
            let exp: Vec<f64> = row.iter().map(|&v| (f64::from(v) - max).exp()).collect();
            let sum: f64 = exp.iter().sum();
            total += sum.ln() + max - f64::from(row[label]);
            for (j, e) in exp.iter().enumerate() {
                let indicator = if j == label { 1.0 } else { 0.0 };
                grad_row[j] = ((e / sum - indicator) / n) as f32;
            }
        }
        Ok(LossOutput {
            value: total / n,
            grad,
        })
    }
}

/// Sigmoid binary cross-entropy for multi-label targets, averaged over all
/// elements. `pos_weight` scales the positive term per class.
#[derive(Debug, Clone, Default)]
pub struct BceWithLogitsLoss {
    pos_weight: Option<Array1<f32>>,
}

impl BceWithLogitsLoss {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pos_weight(pos_weight: Array1<f32>) -> Self {
        Self {
            pos_weight: Some(pos_weight),
        }
    }

    pub fn pos_weight(&self) -> Option<&Array1<f32>> {
        self.pos_weight.as_ref()
    }
}

/// `ln(1 + e^x)` without overflow.
fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

impl LossFn for BceWithLogitsLoss {
    fn name(&self) -> &str {
        "bce_with_logits"
    }

    fn compute(&self, logits: &Array2<f32>, targets: &NodeLabels) -> Result<LossOutput, MlError> {
        check_rows(logits, targets)?;
        let NodeLabels::Multi(labels) = targets else {
            return Err(MlError::training("BCE needs multi-label targets"));
        };
        if labels.shape() != logits.shape() {
            return Err(MlError::training(format!(
                "label shape {:?} does not match logits {:?}",
                labels.shape(),
                logits.shape()
            )));
        }
        if let Some(w) = &self.pos_weight {
            if w.len() != logits.ncols() {
                return Err(MlError::training("pos_weight length does not match class count"));
            }
        }

        let count = logits.len() as f64;
        let mut grad = Array2::zeros(logits.raw_dim());
        let mut total = 0.0f64;
        for ((i, j), &x) in logits.indexed_iter() {
            let x = f64::from(x);
            let y = f64::from(labels[[i, j]]);
            let p = self.pos_weight.as_ref().map_or(1.0, |w| f64::from(w[j]));
            total += p * y * softplus(-x) + (1.0 - y) * softplus(x);
            let sigma = 1.0 / (1.0 + (-x).exp());
            grad[[i, j]] = ((sigma * (1.0 - y) - p * y * (1.0 - sigma)) / count) as f32;
        }
        Ok(LossOutput {
            value: total / count,
            grad,
        })
    }
}

/// Per-class `negatives / positives` over the training targets of `graph`.
/// Classes without positives get weight 1.
pub fn positive_class_weights(graph: &Graph) -> Result<Array1<f32>, MlError> {
    let NodeLabels::Multi(labels) = graph.labels() else {
        return Err(MlError::training("positive class weights need multi-label targets"));
    };
    let nodes = graph.masked_nodes(SplitMask::Train);
    let selected = labels.select(Axis(0), &nodes);
    let total = selected.nrows() as f32;
    Ok(selected.sum_axis(Axis(0)).mapv(|pos| {
        if pos > 0.0 { (total - pos) / pos } else { 1.0 }
    }))
}

/// Loss for a task type; `weighted_bce` derives per-class positive weights
/// from the training view.
pub fn loss_for_task(
    task_type: TaskType,
    weighted_bce: bool,
    train_view: &Graph,
) -> Result<Box<dyn LossFn>, MlError> {
    match task_type {
        TaskType::SingleLabel => Ok(Box::new(CrossEntropyLoss)),
        TaskType::MultiLabel if weighted_bce => {
            let weights = positive_class_weights(train_view)?;
            tracing::info!(pos_weight = ?weights.to_vec(), "Using weighted BCE");
            Ok(Box::new(BceWithLogitsLoss::with_pos_weight(weights)))
        }
        TaskType::MultiLabel => Ok(Box::new(BceWithLogitsLoss::new())),
    }
}

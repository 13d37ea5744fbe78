//! One pass of a phase over its loader.

use crate::data::graph::{NodeLabels, SplitMask};
use crate::error::MlError;
use crate::loader::DataLoader;
use crate::model::{GnnModel, ModelMode};
use crate::optim::Optimizer;
use crate::training::context::RunContext;
use crate::training::loss::LossFn;
use crate::training::metrics::micro_f1;
use ndarray::{Array2, Axis};
use sagebench_core::TaskType;

/// Turns logits into predicted labels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Single-label: highest-scoring class.
    Argmax,
    /// Multi-label: every class whose logit exceeds the threshold.
    Threshold(f32),
}

impl Decision {
    pub fn for_task(task_type: TaskType, threshold: f32) -> Self {
        match task_type {
            TaskType::SingleLabel => Self::Argmax,
            TaskType::MultiLabel => Self::Threshold(threshold),
        }
    }

    pub fn decide(&self, logits: &Array2<f32>) -> NodeLabels {
        match self {
            Self::Argmax => NodeLabels::Single(
                logits
                    .axis_iter(Axis(0))
                    .map(|row| {
                        // First maximum wins on ties.
                        row.iter()
                            .enumerate()
                            .fold((0, f32::NEG_INFINITY), |best, (i, &v)| {
                                if v > best.1 { (i, v) } else { best }
                            })
                            .0
                    })
                    .collect(),
            ),
            Self::Threshold(t) => {
                NodeLabels::Multi(logits.mapv(|v| if v > *t { 1.0 } else { 0.0 }))
            }
        }
    }
}

/// Weighted-mean loss and micro-F1 of a train or val pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitMetrics {
    pub loss: f64,
    pub f1: f64,
}

/// Micro-F1 of a test pass with the collected labels, row-aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct TestMetrics {
    pub f1: f64,
    pub truth: NodeLabels,
    pub predictions: NodeLabels,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Fit(FitMetrics),
    Test(TestMetrics),
}

impl StepOutcome {
    pub fn into_fit(self) -> Result<FitMetrics, MlError> {
        match self {
            Self::Fit(metrics) => Ok(metrics),
            Self::Test(_) => Err(MlError::invariant("expected loss metrics from a test pass")),
        }
    }

    pub fn into_test(self) -> Result<TestMetrics, MlError> {
        match self {
            Self::Test(metrics) => Ok(metrics),
            Self::Fit(_) => Err(MlError::invariant("expected test metrics from a fit pass")),
        }
    }

    pub fn f1(&self) -> f64 {
        match self {
            Self::Fit(m) => m.f1,
            Self::Test(m) => m.f1,
        }
    }
}

/// Runs train, val and test passes.
///
/// Train runs the model in training mode with an optimizer step per batch.
/// Val runs in evaluation mode and computes the loss. Test runs in
/// evaluation mode, computes no loss and keeps labels and predictions.
#[derive(Debug, Clone, Copy)]
pub struct StepExecutor {
    decision: Decision,
}

impl StepExecutor {
    pub fn new(decision: Decision) -> Self {
        Self { decision }
    }

    pub fn decision(&self) -> Decision {
        self.decision
    }

    /// One pass of `phase` over `loader`. The optimizer is required for the
    /// train phase and unused otherwise.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        phase: SplitMask,
        epoch: usize,
        loader: &DataLoader,
        model: &mut dyn GnnModel,
        loss_fn: &dyn LossFn,
        mut optimizer: Option<&mut dyn Optimizer>,
        ctx: &mut RunContext<'_>,
    ) -> Result<StepOutcome, MlError> {
        if loader.num_targets() == 0 {
            return Err(MlError::EmptyPhase {
                phase: phase.to_string(),
            });
        }
        if phase == SplitMask::Train && optimizer.is_none() {
            return Err(MlError::training("the train phase needs an optimizer"));
        }
        model.set_mode(if phase == SplitMask::Train {
            ModelMode::Train
        } else {
            ModelMode::Eval
        });

        let mut loss_sum = 0.0f64;
        let mut seen = 0usize;
        let mut truths = Vec::with_capacity(loader.len());
        let mut predictions = Vec::with_capacity(loader.len());

        for batch in loader.iter(epoch)? {
            let batch = batch?;
            let features = batch
                .input_features()
                .ok_or_else(|| MlError::model("batch has no message-flow blocks"))?;

            let logits = match (phase, optimizer.as_deref_mut()) {
                (SplitMask::Train, Some(optimizer)) => {
                    optimizer.zero_grad(model.parameters_mut());
                    let logits = model.forward(&batch.blocks, features)?;
                    let loss = loss_fn.compute(&logits, &batch.labels)?;
                    check_finite(phase, epoch, loss.value)?;
                    model.backward(&loss.grad)?;
                    optimizer.step(model.parameters_mut())?;
                    loss_sum += loss.value * batch.num_targets() as f64;
                    logits
                }
                (SplitMask::Val, _) => {
                    let logits = model.forward(&batch.blocks, features)?;
                    let loss = loss_fn.compute(&logits, &batch.labels)?;
                    check_finite(phase, epoch, loss.value)?;
                    loss_sum += loss.value * batch.num_targets() as f64;
                    logits
                }
                _ => model.forward(&batch.blocks, features)?,
            };
            if logits.nrows() != batch.num_targets() {
                return Err(MlError::model(format!(
                    "model returned {} rows for {} output nodes",
                    logits.nrows(),
                    batch.num_targets()
                )));
            }

            seen += batch.num_targets();
            predictions.push(self.decision.decide(&logits));
            truths.push(batch.labels);
        }

        let truth = NodeLabels::concat(&truths.iter().collect::<Vec<_>>())?;
        let predicted = NodeLabels::concat(&predictions.iter().collect::<Vec<_>>())?;
        let f1 = micro_f1(&truth, &predicted)?;
        ctx.log_metric(&format!("{phase} F1"), f1, epoch)?;

        if phase == SplitMask::Test {
            tracing::debug!(parent: ctx.span(), %phase, epoch, f1, targets = seen, "Phase finished");
            return Ok(StepOutcome::Test(TestMetrics {
                f1,
                truth,
                predictions: predicted,
            }));
        }

        let loss = loss_sum / seen as f64;
        ctx.log_metric(&format!("{phase} loss"), loss, epoch)?;
        tracing::debug!(parent: ctx.span(), %phase, epoch, loss, f1, targets = seen, "Phase finished");
        Ok(StepOutcome::Fit(FitMetrics { loss, f1 }))
    }
}

fn check_finite(phase: SplitMask, epoch: usize, value: f64) -> Result<(), MlError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(MlError::NumericalFailure {
            phase: phase.to_string(),
            epoch,
            value,
        })
    }
}

//! Epoch loop with model selection and early stopping.

use crate::data::graph::SplitMask;
use crate::error::MlError;
use crate::loader::LoaderSet;
use crate::model::{GnnModel, ModelState};
use crate::optim::Optimizer;
use crate::training::callbacks::{CallbackAction, EarlyStopping};
use crate::training::checkpoint::{CheckpointRecord, Checkpointer};
use crate::training::context::RunContext;
use crate::training::loss::LossFn;
use crate::training::metrics::{ClassificationReport, EpochRecord, TrainingHistory};
use crate::training::selector::{InMemorySnapshotStore, ModelSelector, SnapshotStore, TrainingState};
use crate::training::step::StepExecutor;
use sagebench_core::persistence::atomic_write;
use sagebench_core::{Criterion, ResolvedConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// File name of the uploaded test report.
pub const REPORT_FILE_NAME: &str = "test_report.txt";

/// Name the best model is logged under.
pub const BEST_MODEL_NAME: &str = "Best Model";

/// Settings of the epoch loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSettings {
    pub num_epochs: usize,
    pub patience: usize,
    pub criterion: Criterion,
    /// Number of report rows for single-label tasks.
    pub num_classes: usize,
    /// Scratch directory for the report before upload.
    pub tmp_dir: PathBuf,
}

impl LoopSettings {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            num_epochs: config.general.num_epochs,
            patience: config.general.patience,
            criterion: config.general.criterion,
            num_classes: config.dataset.num_classes,
            tmp_dir: config.general.tmp_dir.clone(),
        }
    }
}

/// Result of a finished loop.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub best_epoch: usize,
    /// Criterion value of the best epoch, larger is better.
    pub best_value: f64,
    pub best_test_f1: f64,
    pub report: ClassificationReport,
    pub history: TrainingHistory,
    /// Parameters the model was restored to.
    pub state: ModelState,
    pub epochs_run: usize,
    /// Last optimizer checkpoint written, if checkpointing was on.
    pub checkpoint: Option<CheckpointRecord>,
}

/// Runs `train`, `val` and `test` each epoch, keeps the best model by the
/// validation criterion and stops after `patience` epochs without
/// improvement.
pub struct TrainingLoop<S: SnapshotStore = InMemorySnapshotStore> {
    settings: LoopSettings,
    executor: StepExecutor,
    early_stopping: EarlyStopping,
    store: S,
    checkpointer: Option<Checkpointer>,
}

impl TrainingLoop<InMemorySnapshotStore> {
    pub fn new(settings: LoopSettings, executor: StepExecutor) -> Self {
        Self {
            early_stopping: EarlyStopping::new(settings.patience),
            settings,
            executor,
            store: InMemorySnapshotStore::new(),
            checkpointer: None,
        }
    }
}

impl<S: SnapshotStore> TrainingLoop<S> {
    /// Keep best-model snapshots in `store` instead.
    pub fn with_store<T: SnapshotStore>(self, store: T) -> TrainingLoop<T> {
        TrainingLoop {
            settings: self.settings,
            executor: self.executor,
            early_stopping: self.early_stopping,
            store,
            checkpointer: self.checkpointer,
        }
    }

    /// Persist optimizer state on every improvement.
    pub fn with_checkpointer(mut self, checkpointer: Checkpointer) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Train until `num_epochs` or patience runs out. On failure any
    /// checkpoint written so far is removed before the error is returned.
    pub fn run(
        &mut self,
        loaders: &LoaderSet,
        model: &mut dyn GnnModel,
        loss_fn: &dyn LossFn,
        optimizer: &mut dyn Optimizer,
        ctx: &mut RunContext<'_>,
    ) -> Result<TrainingOutcome, MlError> {
        let result = self.run_epochs(loaders, model, loss_fn, optimizer, ctx);
        if result.is_err() {
            if let Some(checkpointer) = &self.checkpointer {
                if let Err(e) = checkpointer.discard() {
                    tracing::warn!(
                        parent: ctx.span(),
                        path = %checkpointer.path().display(),
                        error = %e,
                        "Could not remove checkpoint of failed run"
                    );
                }
            }
        }
        result
    }

    fn run_epochs(
        &mut self,
        loaders: &LoaderSet,
        model: &mut dyn GnnModel,
        loss_fn: &dyn LossFn,
        optimizer: &mut dyn Optimizer,
        ctx: &mut RunContext<'_>,
    ) -> Result<TrainingOutcome, MlError> {
        let span = ctx.span().clone();
        let mut selector = ModelSelector::new(self.settings.criterion);
        let mut state = TrainingState::default();
        let mut history = TrainingHistory::default();
        let mut checkpoint = None;

        for epoch in 1..=self.settings.num_epochs {
            state.epoch = epoch;
            let train = self
                .executor
                .run(SplitMask::Train, epoch, &loaders.train, model, loss_fn, Some(&mut *optimizer), ctx)?
                .into_fit()?;
            let val = self
                .executor
                .run(SplitMask::Val, epoch, &loaders.val, model, loss_fn, None, ctx)?
                .into_fit()?;
            let test = self
                .executor
                .run(SplitMask::Test, epoch, &loaders.test, model, loss_fn, None, ctx)?
                .into_test()?;

            tracing::info!(
                parent: &span,
                epoch,
                train_loss = train.loss,
                train_f1 = train.f1,
                val_loss = val.loss,
                val_f1 = val.f1,
                test_f1 = test.f1,
                "Epoch finished"
            );

            let improved = selector.observe(epoch, &val);
            if improved {
                ctx.log_metric("Best Test F1", test.f1, epoch)?;
                self.store.save(epoch, &model.state_dict())?;
                let report =
                    ClassificationReport::new(&test.truth, &test.predictions, self.settings.num_classes)?;
                if let Some(checkpointer) = &self.checkpointer {
                    checkpoint = Some(checkpointer.write(epoch, &*optimizer)?);
                }
                state.best_epoch = Some(epoch);
                state.best_value = Some(selector.best_value());
                state.best_test_f1 = Some(test.f1);
                state.best_report = Some(report);
                state.best_test_predictions = Some(test.predictions);
            }

            history.record(EpochRecord {
                epoch,
                train_loss: train.loss,
                train_f1: train.f1,
                val_loss: val.loss,
                val_f1: val.f1,
                test_f1: test.f1,
                improved,
            });

            if self.early_stopping.on_epoch_end(epoch, selector.best_epoch()) == CallbackAction::Stop {
                tracing::info!(
                    parent: &span,
                    epoch,
                    best_epoch = ?selector.best_epoch(),
                    patience = self.early_stopping.patience,
                    "Patience reached, stopping early"
                );
                break;
            }
        }

        let outcome = self.finish(state, history, checkpoint, model, ctx)?;
        tracing::info!(parent: &span, "Best model report:\n{}", outcome.report);
        Ok(outcome)
    }

    /// Restore the best snapshot and upload the run's artifacts.
    fn finish(
        &self,
        state: TrainingState,
        history: TrainingHistory,
        checkpoint: Option<CheckpointRecord>,
        model: &mut dyn GnnModel,
        ctx: &mut RunContext<'_>,
    ) -> Result<TrainingOutcome, MlError> {
        let TrainingState {
            epoch: epochs_run,
            best_epoch: Some(best_epoch),
            best_value: Some(best_value),
            best_test_f1: Some(best_test_f1),
            best_report: Some(report),
            ..
        } = state
        else {
            return Err(MlError::invariant("no epoch improved on the initial criterion value"));
        };

        let (stored_epoch, best_state) = self
            .store
            .load()?
            .ok_or_else(|| MlError::invariant("best model snapshot is missing"))?;
        if stored_epoch != best_epoch {
            return Err(MlError::invariant(format!(
                "snapshot is from epoch {stored_epoch}, best epoch is {best_epoch}"
            )));
        }
        model.load_state_dict(&best_state)?;
        ctx.tracker()
            .log_model(&serde_json::to_value(&best_state)?, BEST_MODEL_NAME)?;

        if let (Some(checkpointer), Some(_)) = (&self.checkpointer, &checkpoint) {
            checkpointer.upload(ctx)?;
        }

        let report_path = self.settings.tmp_dir.join(REPORT_FILE_NAME);
        atomic_write(&report_path, report.to_string().as_bytes())?;
        ctx.log_artifact(&report_path, None)?;

        Ok(TrainingOutcome {
            best_epoch,
            best_value,
            best_test_f1,
            report,
            history,
            state: best_state,
            epochs_run,
            checkpoint,
        })
    }
}

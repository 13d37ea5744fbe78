//! End-to-end orchestration of one training run.

use crate::data::dataset::DatasetSource;
use crate::data::graph::SplitMask;
use crate::data::split::DataSplitter;
use crate::error::MlError;
use crate::loader::LoaderFactory;
use crate::model::GnnModel;
use crate::optim::Adam;
use crate::training::checkpoint::Checkpointer;
use crate::training::context::RunContext;
use crate::training::loss::loss_for_task;
use crate::training::reproducibility::SeedManager;
use crate::training::step::{Decision, StepExecutor};
use crate::training::trainer::{LoopSettings, TrainingLoop, TrainingOutcome};
use sagebench_core::{ResolvedConfig, RunInfo, Tracker};
use tracing::Span;

/// Tag recording how a run ended.
pub const STATUS_TAG: &str = "status";

/// A finished run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run: RunInfo,
    pub outcome: TrainingOutcome,
}

/// Runs one model on one dataset: tracking setup, dataset loading,
/// splitting, loaders, loss, model, optimizer and the epoch loop.
///
/// Models are built by the caller-supplied factory; the runner resets their
/// parameters with the seed derived for the `model` component.
pub struct TrainingRunner<'a> {
    config: &'a ResolvedConfig,
    source: &'a dyn DatasetSource,
}

impl<'a> TrainingRunner<'a> {
    pub fn new(config: &'a ResolvedConfig, source: &'a dyn DatasetSource) -> Self {
        Self { config, source }
    }

    pub fn config(&self) -> &ResolvedConfig {
        self.config
    }

    /// Run to completion. On failure the run is tagged `failed` and ended
    /// before the error is returned.
    pub fn run<F>(&self, tracker: &mut dyn Tracker, build_model: F) -> Result<RunSummary, MlError>
    where
        F: FnOnce(&ResolvedConfig) -> Result<Box<dyn GnnModel>, MlError>,
    {
        let run = tracker.start_run(&self.config.model_name)?;
        let span = tracing::info_span!(
            "run",
            run_id = %run.run_id,
            model = %self.config.model_name,
            dataset = %self.config.dataset_name,
        );
        tracing::info!(parent: &span, run_name = %run.run_name, "Launching run");

        match self.execute(&run, tracker, span.clone(), build_model) {
            Ok(outcome) => {
                tracker.set_tag(STATUS_TAG, "finished")?;
                tracker.end_run()?;
                tracing::info!(
                    parent: &span,
                    best_epoch = outcome.best_epoch,
                    best_test_f1 = outcome.best_test_f1,
                    epochs_run = outcome.epochs_run,
                    "Run finished"
                );
                Ok(RunSummary { run, outcome })
            }
            Err(e) => {
                tracing::error!(parent: &span, error = %e, "Run failed");
                if let Err(tag_err) = tracker.set_tag(STATUS_TAG, "failed") {
                    tracing::warn!(parent: &span, error = %tag_err, "Could not tag failed run");
                }
                if let Err(end_err) = tracker.end_run() {
                    tracing::warn!(parent: &span, error = %end_err, "Could not end failed run");
                }
                Err(e)
            }
        }
    }

    fn execute<F>(
        &self,
        run: &RunInfo,
        tracker: &mut dyn Tracker,
        span: Span,
        build_model: F,
    ) -> Result<TrainingOutcome, MlError>
    where
        F: FnOnce(&ResolvedConfig) -> Result<Box<dyn GnnModel>, MlError>,
    {
        let config = self.config;
        tracker.set_tag("base model", &config.model.base_model)?;
        tracker.set_tag("dataset", &config.dataset_name)?;
        tracker.log_params(config.params())?;
        tracing::info!(parent: &span, general = ?config.general, "General configuration");
        tracing::info!(parent: &span, hyperparameters = ?config.hyperparameters, "Hyperparameters");

        let mut raw = self.source.load(&config.dataset_name)?;
        raw.check_spec(&config.dataset)?;
        if config.general.normalize_features {
            raw.row_normalize();
        }
        let split = DataSplitter::from_config(config).split(raw)?;

        let mut seeds = SeedManager::new(config.general.seed);
        let loaders = LoaderFactory::build(&split, config, &mut seeds)?;
        let loss_fn = loss_for_task(
            config.dataset.task_type,
            config.hyperparameters.weighted_bce(),
            split.view(SplitMask::Train),
        )?;

        let mut model = build_model(config)?;
        model.reset_parameters(seeds.get_seed("model"));
        tracing::info!(
            parent: &span,
            model = model.name(),
            parameters = model.parameters().num_elements(),
            "Model ready"
        );

        let mut optimizer = Adam::with_weight_decay(
            config.hyperparameters.lr as f32,
            config.hyperparameters.weight_decay as f32,
        );
        let executor = StepExecutor::new(Decision::for_task(
            config.dataset.task_type,
            config.general.multilabel_threshold,
        ));
        let mut training = TrainingLoop::new(LoopSettings::from_config(config), executor);
        if config.general.save_model {
            training = training.with_checkpointer(Checkpointer::new(
                &config.general.tmp_dir,
                &run.run_name,
                &run.run_id,
            ));
        }

        let mut ctx = RunContext::new(tracker, span);
        training.run(&loaders, model.as_mut(), loss_fn.as_ref(), &mut optimizer, &mut ctx)
    }
}

//! Training infrastructure: phase steps, losses, metrics, model selection,
//! checkpoints and the end-to-end runner.

pub mod callbacks;
pub mod checkpoint;
pub mod context;
pub mod loss;
pub mod metrics;
pub mod reproducibility;
pub mod runner;
pub mod selector;
pub mod step;
pub mod trainer;

pub use callbacks::{CallbackAction, EarlyStopping};
pub use checkpoint::{CheckpointPayload, CheckpointRecord, Checkpointer};
pub use context::RunContext;
pub use loss::{BceWithLogitsLoss, CrossEntropyLoss, LossFn, LossOutput, loss_for_task};
pub use metrics::{ClassificationReport, EpochRecord, TrainingHistory, micro_f1};
pub use reproducibility::SeedManager;
pub use runner::{RunSummary, TrainingRunner};
pub use selector::{
    DiskSnapshotStore, InMemorySnapshotStore, ModelSelector, SnapshotStore, TrainingState,
};
pub use step::{Decision, FitMetrics, StepExecutor, StepOutcome, TestMetrics};
pub use trainer::{LoopSettings, TrainingLoop, TrainingOutcome};

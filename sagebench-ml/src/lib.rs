//! # sagebench-ml
//!
//! Node-classification training core for Sagebench: dataset sources and
//! phase splitting, mini-batch loaders with neighbor sampling and parallel
//! prefetch, the model and optimizer contracts, and the epoch loop with
//! model selection, early stopping and checkpointing.

pub mod data;
pub mod error;
pub mod loader;
pub mod model;
pub mod optim;
pub mod training;

pub use data::{
    DataSplitter, DatasetRegistry, DatasetSource, Graph, GraphSplit, JsonDirectorySource,
    NodeLabels, RawDataset, SplitMask, SplitPolicy,
};
pub use error::MlError;
pub use loader::{Batch, Block, DataLoader, LoaderFactory, LoaderPlan, LoaderSet, LoaderStrategy};
pub use model::{GnnModel, ModelMode, ModelState, Parameter, ParameterSet};
pub use optim::{Adam, Optimizer};
pub use training::{
    RunContext, RunSummary, StepExecutor, TrainingLoop, TrainingOutcome, TrainingRunner,
};

//! # sagebench-core
//!
//! Shared foundation for the Sagebench node-classification harness:
//! layered configuration and its resolution into a single run config,
//! error types, atomic persistence helpers, tracing setup, and the
//! experiment-tracking sink.

pub mod config;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod tracking;

pub use config::{
    Criterion, DatasetSpec, ExperimentConfig, Framework, GeneralSettings, Hyperparameters,
    InductiveOption, ModelConfig, NumNeighbors, ResolvedConfig, SamplingStrategy, SoftTrainMask,
    TaskType, load_config,
};
pub use error::{ConfigError, CoreError, TrackingError};
pub use logging::{LogSettings, init_logging};
pub use tracking::{FileTracker, RecordingTracker, RunInfo, Tracker, TrackerEvent};

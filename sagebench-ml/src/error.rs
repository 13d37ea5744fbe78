//! Error types for the sagebench-ml crate.

use sagebench_core::{ConfigError, TrackingError};
use thiserror::Error;

/// Top-level error type for data preparation and training.
#[derive(Debug, Error)]
pub enum MlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Unsupported dataset: {0}")]
    UnsupportedDataset(String),

    #[error("Split error: {0}")]
    Split(String),

    #[error("Loader error: {0}")]
    Loader(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Non-finite loss {value} in {phase} phase at epoch {epoch}")]
    NumericalFailure {
        phase: String,
        epoch: usize,
        value: f64,
    },

    #[error("The {phase} loader produced no targets")]
    EmptyPhase { phase: String },

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl MlError {
    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn split(msg: impl Into<String>) -> Self {
        Self::Split(msg.into())
    }

    pub fn loader(msg: impl Into<String>) -> Self {
        Self::Loader(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }
}

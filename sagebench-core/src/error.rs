//! Error types for the Sagebench core library.
//!
//! Uses `thiserror` for public API error types covering configuration
//! resolution and experiment tracking.

use std::path::PathBuf;

/// Top-level error type for the Sagebench core library.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for '{field}' (expected one of: {allowed})")]
    InvalidOption {
        field: String,
        value: String,
        allowed: String,
    },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Model '{name}' is not defined in the model collection")]
    UnknownModel { name: String },

    #[error("Dataset '{name}' is not defined in the dataset collection")]
    UnknownDataset { name: String },

    #[error("num_neighbors has {got} entries but the model has {expected} layers")]
    FanoutLength { expected: usize, got: usize },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {0}")]
    Parse(#[from] Box<figment::Error>),

    #[error("Configuration value error: {0}")]
    Value(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn invalid_option(field: &str, value: &str, allowed: &[&str]) -> Self {
        Self::InvalidOption {
            field: field.to_string(),
            value: value.to_string(),
            allowed: allowed.join(", "),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// Errors from experiment-tracking sinks.
#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error("No active run")]
    NoActiveRun,

    #[error("A run is already active: {run_id}")]
    RunAlreadyActive { run_id: String },

    #[error("Artifact not found: {path}")]
    ArtifactNotFound { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A type alias for results using the top-level `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

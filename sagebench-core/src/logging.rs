//! Tracing setup: human-readable stderr plus optional JSON file logging.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Logging options for a training process.
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Filter directive for the stderr layer (`info`, `debug`, `sagebench_ml=trace`, ...).
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Directory for daily-rolling JSON logs. Disabled when `None`.
    pub json_dir: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_dir: None,
        }
    }
}

impl LogSettings {
    fn stderr_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

/// Install the global tracing subscriber.
///
/// The returned guard flushes the JSON writer on drop and must be held for
/// the lifetime of the process. Installing twice is an error reported by
/// `tracing-subscriber`.
pub fn init_logging(
    settings: &LogSettings,
) -> Result<Option<WorkerGuard>, tracing_subscriber::util::TryInitError> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(settings.stderr_filter());

    let (json_layer, guard) = match &settings.json_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "sagebench.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .try_init()?;

    Ok(guard)
}

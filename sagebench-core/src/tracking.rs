//! Experiment-tracking sinks.
//!
//! The training core talks to a [`Tracker`] handle passed in explicitly.
//! [`FileTracker`] keeps runs in a local directory tree; [`RecordingTracker`]
//! records every call in memory and is what the test-suites inspect.

use crate::error::TrackingError;
use crate::persistence::{append_json_line, atomic_write_json, load_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Lifecycle status of a tracked run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Finished,
}

/// Identity and timing of a tracked run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub run_name: String,
    pub experiment: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl RunInfo {
    fn new(experiment: &str, run_name: &str) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().simple().to_string(),
            run_name: run_name.to_string(),
            experiment: experiment.to_string(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
        }
    }
}

/// One metric observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub name: String,
    pub value: f64,
    pub step: usize,
    pub timestamp: DateTime<Utc>,
}

/// Sink for run parameters, metrics and artifacts.
pub trait Tracker {
    fn start_run(&mut self, name: &str) -> Result<RunInfo, TrackingError>;
    fn set_tag(&mut self, key: &str, value: &str) -> Result<(), TrackingError>;
    fn log_params(&mut self, params: &BTreeMap<String, Value>) -> Result<(), TrackingError>;
    fn log_metric(&mut self, name: &str, value: f64, step: usize) -> Result<(), TrackingError>;
    /// Upload a local file, optionally under an artifact sub-directory.
    fn log_artifact(&mut self, path: &Path, artifact_dir: Option<&str>)
    -> Result<(), TrackingError>;
    /// Store a serialized model under `name`.
    fn log_model(&mut self, model: &Value, name: &str) -> Result<(), TrackingError>;
    fn end_run(&mut self) -> Result<(), TrackingError>;
}

// ---------------------------------------------------------------------------
// FileTracker
// ---------------------------------------------------------------------------

/// Local run store.
///
/// Layout: `<root>/<experiment>/<run_id>/{meta.json, tags.json, params.json,
/// metrics.jsonl, artifacts/, models/<name>.json}`.
pub struct FileTracker {
    root: PathBuf,
    experiment: String,
    active: Option<RunInfo>,
}

impl FileTracker {
    pub fn new(root: impl Into<PathBuf>, experiment: &str) -> Self {
        Self {
            root: root.into(),
            experiment: experiment.to_string(),
            active: None,
        }
    }

    /// Directory of the active run.
    pub fn run_dir(&self) -> Result<PathBuf, TrackingError> {
        let run = self.active.as_ref().ok_or(TrackingError::NoActiveRun)?;
        Ok(self.root.join(&self.experiment).join(&run.run_id))
    }

    fn update_map(&self, file: &str, entries: &BTreeMap<String, Value>) -> Result<(), TrackingError> {
        let path = self.run_dir()?.join(file);
        let mut current: BTreeMap<String, Value> = load_json(&path)?.unwrap_or_default();
        current.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
        atomic_write_json(&path, &current)?;
        Ok(())
    }
}

impl Tracker for FileTracker {
    fn start_run(&mut self, name: &str) -> Result<RunInfo, TrackingError> {
        if let Some(run) = &self.active {
            return Err(TrackingError::RunAlreadyActive {
                run_id: run.run_id.clone(),
            });
        }
        let info = RunInfo::new(&self.experiment, name);
        self.active = Some(info.clone());
        let dir = self.run_dir()?;
        atomic_write_json(&dir.join("meta.json"), &info)?;
        tracing::debug!(run_id = %info.run_id, dir = %dir.display(), "Started tracking run");
        Ok(info)
    }

    fn set_tag(&mut self, key: &str, value: &str) -> Result<(), TrackingError> {
        let mut tags = BTreeMap::new();
        tags.insert(key.to_string(), Value::String(value.to_string()));
        self.update_map("tags.json", &tags)
    }

    fn log_params(&mut self, params: &BTreeMap<String, Value>) -> Result<(), TrackingError> {
        self.update_map("params.json", params)
    }

    fn log_metric(&mut self, name: &str, value: f64, step: usize) -> Result<(), TrackingError> {
        let point = MetricPoint {
            name: name.to_string(),
            value,
            step,
            timestamp: Utc::now(),
        };
        append_json_line(&self.run_dir()?.join("metrics.jsonl"), &point)?;
        Ok(())
    }

    fn log_artifact(
        &mut self,
        path: &Path,
        artifact_dir: Option<&str>,
    ) -> Result<(), TrackingError> {
        let file_name = path.file_name().ok_or_else(|| TrackingError::ArtifactNotFound {
            path: path.to_path_buf(),
        })?;
        if !path.is_file() {
            return Err(TrackingError::ArtifactNotFound {
                path: path.to_path_buf(),
            });
        }
        let mut dest = self.run_dir()?.join("artifacts");
        if let Some(sub) = artifact_dir {
            dest = dest.join(sub);
        }
        std::fs::create_dir_all(&dest)?;
        std::fs::copy(path, dest.join(file_name))?;
        Ok(())
    }

    fn log_model(&mut self, model: &Value, name: &str) -> Result<(), TrackingError> {
        let path = self.run_dir()?.join("models").join(format!("{name}.json"));
        atomic_write_json(&path, model)?;
        Ok(())
    }

    fn end_run(&mut self) -> Result<(), TrackingError> {
        let dir = self.run_dir()?;
        if let Some(mut info) = self.active.take() {
            info.status = RunStatus::Finished;
            info.ended_at = Some(Utc::now());
            atomic_write_json(&dir.join("meta.json"), &info)?;
            tracing::debug!(run_id = %info.run_id, "Finished tracking run");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingTracker
// ---------------------------------------------------------------------------

/// A call recorded by [`RecordingTracker`].
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    StartRun { name: String },
    Tag { key: String, value: String },
    Params(BTreeMap<String, Value>),
    Metric { name: String, value: f64, step: usize },
    /// Artifact contents are captured at upload time.
    Artifact {
        file_name: String,
        artifact_dir: Option<String>,
        contents: Vec<u8>,
    },
    Model { name: String, model: Value },
    EndRun,
}

/// In-memory tracker. Clones share the same event log.
#[derive(Debug, Clone, Default)]
pub struct RecordingTracker {
    events: Arc<Mutex<Vec<TrackerEvent>>>,
}

impl RecordingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TrackerEvent>> {
        // A poisoned log still holds every event recorded before the panic.
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, event: TrackerEvent) {
        self.lock().push(event);
    }

    pub fn events(&self) -> Vec<TrackerEvent> {
        self.lock().clone()
    }

    /// All `(step, value)` pairs logged under a metric name.
    pub fn metric(&self, name: &str) -> Vec<(usize, f64)> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                TrackerEvent::Metric {
                    name: n,
                    value,
                    step,
                } if n == name => Some((*step, *value)),
                _ => None,
            })
            .collect()
    }

    pub fn tag(&self, key: &str) -> Option<String> {
        self.lock().iter().rev().find_map(|e| match e {
            TrackerEvent::Tag { key: k, value } if k == key => Some(value.clone()),
            _ => None,
        })
    }

    pub fn artifact(&self, file_name: &str) -> Option<Vec<u8>> {
        self.lock().iter().find_map(|e| match e {
            TrackerEvent::Artifact {
                file_name: f,
                contents,
                ..
            } if f == file_name => Some(contents.clone()),
            _ => None,
        })
    }
}

impl Tracker for RecordingTracker {
    fn start_run(&mut self, name: &str) -> Result<RunInfo, TrackingError> {
        self.push(TrackerEvent::StartRun {
            name: name.to_string(),
        });
        Ok(RunInfo::new("recording", name))
    }

    fn set_tag(&mut self, key: &str, value: &str) -> Result<(), TrackingError> {
        self.push(TrackerEvent::Tag {
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    fn log_params(&mut self, params: &BTreeMap<String, Value>) -> Result<(), TrackingError> {
        self.push(TrackerEvent::Params(params.clone()));
        Ok(())
    }

    fn log_metric(&mut self, name: &str, value: f64, step: usize) -> Result<(), TrackingError> {
        self.push(TrackerEvent::Metric {
            name: name.to_string(),
            value,
            step,
        });
        Ok(())
    }

    fn log_artifact(
        &mut self,
        path: &Path,
        artifact_dir: Option<&str>,
    ) -> Result<(), TrackingError> {
        let contents = std::fs::read(path).map_err(|_| TrackingError::ArtifactNotFound {
            path: path.to_path_buf(),
        })?;
        self.push(TrackerEvent::Artifact {
            file_name: path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default(),
            artifact_dir: artifact_dir.map(str::to_string),
            contents,
        });
        Ok(())
    }

    fn log_model(&mut self, model: &Value, name: &str) -> Result<(), TrackingError> {
        self.push(TrackerEvent::Model {
            name: name.to_string(),
            model: model.clone(),
        });
        Ok(())
    }

    fn end_run(&mut self) -> Result<(), TrackingError> {
        self.push(TrackerEvent::EndRun);
        Ok(())
    }
}

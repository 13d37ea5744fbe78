//! Optimizer-state checkpoints.
//!
//! A checkpoint is `{epoch, optimizer_state}` written to a run-scoped file
//! under the temporary directory. Each improving epoch overwrites it; at the
//! end of the run it is uploaded to the tracker and removed locally.

use crate::error::MlError;
use crate::optim::Optimizer;
use crate::training::context::RunContext;
use chrono::{DateTime, Utc};
use sagebench_core::persistence::atomic_write;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Artifact directory checkpoints are uploaded to.
pub const CHECKPOINT_ARTIFACT_DIR: &str = "Optimizer States";

/// Contents of a checkpoint file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPayload {
    pub epoch: usize,
    pub optimizer_state: Value,
}

/// Metadata of a written checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub epoch: usize,
    pub path: PathBuf,
    /// SHA-256 of the file contents, hex encoded.
    pub hash: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Writes and uploads optimizer checkpoints for one run.
#[derive(Debug, Clone)]
pub struct Checkpointer {
    path: PathBuf,
}

impl Checkpointer {
    /// Checkpoint path `<tmp_dir>/<run_name>-Optimizer-<run_id>.ckpt`.
    pub fn new(tmp_dir: &Path, run_name: &str, run_id: &str) -> Self {
        Self {
            path: tmp_dir.join(format!("{run_name}-Optimizer-{run_id}.ckpt")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the checkpoint file and describe it.
    pub fn write(&self, epoch: usize, optimizer: &dyn Optimizer) -> Result<CheckpointRecord, MlError> {
        let payload = CheckpointPayload {
            epoch,
            optimizer_state: optimizer.state_dict()?,
        };
        let bytes = serde_json::to_vec(&payload)?;
        atomic_write(&self.path, &bytes)?;

        let hash = format!("{:x}", Sha256::digest(&bytes));
        Ok(CheckpointRecord {
            epoch,
            path: self.path.clone(),
            hash,
            size_bytes: bytes.len() as u64,
            created_at: Utc::now(),
        })
    }

    /// Upload the last written checkpoint, then delete the local file.
    pub fn upload(&self, ctx: &mut RunContext<'_>) -> Result<(), MlError> {
        let uploaded = ctx.log_artifact(&self.path, Some(CHECKPOINT_ARTIFACT_DIR));
        std::fs::remove_file(&self.path)?;
        uploaded?;
        tracing::debug!(parent: ctx.span(), path = %self.path.display(), "Optimizer checkpoint uploaded");
        Ok(())
    }

    /// Remove a checkpoint left behind by a failed run. A missing file is
    /// not an error.
    pub fn discard(&self) -> Result<(), MlError> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Read a checkpoint file back.
    pub fn load(path: &Path) -> Result<CheckpointPayload, MlError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParameterSet;
    use crate::optim::Adam;
    use ndarray::array;
    use sagebench_core::RecordingTracker;
    use tempfile::TempDir;

    fn stepped_adam() -> Adam {
        let mut params = ParameterSet::new();
        params.insert("w", array![1.0f32, 2.0].into_dyn());
        params.get_mut("w").unwrap().grad.fill(0.5);
        let mut adam = Adam::with_weight_decay(0.01, 0.0);
        adam.step(&mut params).unwrap();
        adam
    }

    #[test]
    fn test_write_and_load() {
        let dir = TempDir::new().unwrap();
        let checkpointer = Checkpointer::new(dir.path(), "GAT-Cora", "abc123");
        assert!(checkpointer.path().ends_with("GAT-Cora-Optimizer-abc123.ckpt"));

        let adam = stepped_adam();
        let record = checkpointer.write(4, &adam).unwrap();
        assert_eq!(record.epoch, 4);
        assert_eq!(record.hash.len(), 64);
        assert_eq!(record.size_bytes, std::fs::metadata(checkpointer.path()).unwrap().len());

        let payload = Checkpointer::load(checkpointer.path()).unwrap();
        assert_eq!(payload.epoch, 4);
        assert_eq!(payload.optimizer_state, adam.state_dict().unwrap());
    }

    #[test]
    fn test_discard_removes_written_checkpoint() {
        let dir = TempDir::new().unwrap();
        let checkpointer = Checkpointer::new(dir.path(), "run", "id");
        checkpointer.discard().unwrap();

        checkpointer.write(3, &stepped_adam()).unwrap();
        assert!(checkpointer.path().is_file());
        checkpointer.discard().unwrap();
        assert!(!checkpointer.path().exists());
    }

    #[test]
    fn test_upload_sends_latest_then_removes() {
        let dir = TempDir::new().unwrap();
        let mut tracker = RecordingTracker::new();
        let probe = tracker.clone();
        let mut ctx = RunContext::new(&mut tracker, tracing::Span::none());
        let checkpointer = Checkpointer::new(&dir.path().join("tmp"), "run", "id");

        checkpointer.write(1, &stepped_adam()).unwrap();
        let record = checkpointer.write(2, &stepped_adam()).unwrap();
        checkpointer.upload(&mut ctx).unwrap();
        assert!(!checkpointer.path().exists());

        let uploaded = probe.artifact("run-Optimizer-id.ckpt").unwrap();
        let payload: CheckpointPayload = serde_json::from_slice(&uploaded).unwrap();
        assert_eq!(payload.epoch, 2);
        assert_eq!(format!("{:x}", Sha256::digest(&uploaded)), record.hash);
        assert!(probe.events().iter().any(|e| matches!(
            e,
            sagebench_core::TrackerEvent::Artifact { artifact_dir: Some(dir), .. }
                if dir == CHECKPOINT_ARTIFACT_DIR
        )));
    }
}

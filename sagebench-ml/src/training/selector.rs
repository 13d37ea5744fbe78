//! Best-epoch selection and best-model snapshots.

use crate::data::graph::NodeLabels;
use crate::error::MlError;
use crate::model::ModelState;
use crate::training::metrics::ClassificationReport;
use crate::training::step::FitMetrics;
use sagebench_core::Criterion;
use sagebench_core::persistence::{atomic_write_json, load_json};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tracks the best criterion value seen so far.
///
/// Scores are "larger is better": the negated validation loss for
/// [`Criterion::Loss`], the validation F1 for [`Criterion::F1`]. The initial
/// value is strictly below any finite score.
#[derive(Debug, Clone)]
pub struct ModelSelector {
    criterion: Criterion,
    best_value: f64,
    best_epoch: Option<usize>,
}

impl ModelSelector {
    pub fn new(criterion: Criterion) -> Self {
        Self {
            criterion,
            best_value: Self::sentinel(criterion),
            best_epoch: None,
        }
    }

    pub fn sentinel(criterion: Criterion) -> f64 {
        match criterion {
            Criterion::Loss => f64::NEG_INFINITY,
            Criterion::F1 => -1.0,
        }
    }

    pub fn criterion(&self) -> Criterion {
        self.criterion
    }

    pub fn score(&self, val: &FitMetrics) -> f64 {
        match self.criterion {
            Criterion::Loss => -val.loss,
            Criterion::F1 => val.f1,
        }
    }

    /// Record an epoch's validation metrics; true when it is the new best.
    pub fn observe(&mut self, epoch: usize, val: &FitMetrics) -> bool {
        let score = self.score(val);
        if score > self.best_value {
            self.best_value = score;
            self.best_epoch = Some(epoch);
            true
        } else {
            false
        }
    }

    pub fn best_value(&self) -> f64 {
        self.best_value
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }
}

/// Loop state carried across epochs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingState {
    pub epoch: usize,
    pub best_epoch: Option<usize>,
    pub best_value: Option<f64>,
    pub best_test_f1: Option<f64>,
    pub best_report: Option<ClassificationReport>,
    pub best_test_predictions: Option<NodeLabels>,
}

/// Storage for the best model snapshot.
pub trait SnapshotStore {
    /// Replace the stored snapshot. The store keeps its own copy.
    fn save(&mut self, epoch: usize, state: &ModelState) -> Result<(), MlError>;

    /// The stored snapshot and the epoch it was taken at.
    fn load(&self) -> Result<Option<(usize, ModelState)>, MlError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshotStore {
    best: Option<(usize, ModelState)>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn save(&mut self, epoch: usize, state: &ModelState) -> Result<(), MlError> {
        self.best = Some((epoch, state.clone()));
        Ok(())
    }

    fn load(&self) -> Result<Option<(usize, ModelState)>, MlError> {
        Ok(self.best.clone())
    }
}

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    epoch: usize,
    state: ModelState,
}

/// Snapshot kept as a JSON file, replaced atomically.
#[derive(Debug, Clone)]
pub struct DiskSnapshotStore {
    path: PathBuf,
}

impl DiskSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for DiskSnapshotStore {
    fn save(&mut self, epoch: usize, state: &ModelState) -> Result<(), MlError> {
        #[derive(Serialize)]
        struct Borrowed<'a> {
            epoch: usize,
            state: &'a ModelState,
        }
        atomic_write_json(&self.path, &Borrowed { epoch, state })?;
        Ok(())
    }

    fn load(&self) -> Result<Option<(usize, ModelState)>, MlError> {
        let file: Option<SnapshotFile> = load_json(&self.path)?;
        Ok(file.map(|f| (f.epoch, f.state)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn fit(loss: f64, f1: f64) -> FitMetrics {
        FitMetrics { loss, f1 }
    }

    fn state(v: f32) -> ModelState {
        let mut params = BTreeMap::new();
        params.insert("w".to_string(), ArrayD::from_elem(vec![2], v));
        ModelState {
            params,
            buffers: BTreeMap::new(),
        }
    }

    #[test]
    fn test_f1_sentinel_replaced_by_first_epoch() {
        let mut selector = ModelSelector::new(Criterion::F1);
        assert_eq!(selector.best_value(), -1.0);
        assert!(selector.observe(1, &fit(0.9, 0.4)));
        assert_eq!(selector.best_value(), 0.4);
        assert_eq!(selector.best_epoch(), Some(1));
    }

    #[test]
    fn test_zero_f1_still_beats_sentinel() {
        let mut selector = ModelSelector::new(Criterion::F1);
        assert!(selector.observe(1, &fit(1.0, 0.0)));
    }

    #[test]
    fn test_loss_criterion_prefers_lower_loss() {
        let mut selector = ModelSelector::new(Criterion::Loss);
        assert!(selector.observe(1, &fit(1e12, 0.0)));
        assert!(selector.observe(2, &fit(0.5, 0.0)));
        assert!(!selector.observe(3, &fit(0.5, 0.9)));
        assert!(!selector.observe(4, &fit(0.7, 0.9)));
        assert_eq!(selector.best_epoch(), Some(2));
        assert_eq!(selector.best_value(), -0.5);
    }

    #[test]
    fn test_in_memory_store_copies() {
        let mut store = InMemorySnapshotStore::new();
        let mut s = state(1.0);
        store.save(3, &s).unwrap();
        s.params.get_mut("w").unwrap().fill(9.0);
        let (epoch, saved) = store.load().unwrap().unwrap();
        assert_eq!(epoch, 3);
        assert_eq!(saved, state(1.0));
    }

    #[test]
    fn test_disk_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut store = DiskSnapshotStore::new(dir.path().join("best").join("model.json"));
        assert!(store.load().unwrap().is_none());
        store.save(2, &state(0.5)).unwrap();
        store.save(5, &state(0.25)).unwrap();
        assert_eq!(store.load().unwrap(), Some((5, state(0.25))));
    }

    proptest! {
        #[test]
        fn prop_best_value_is_monotone(scores in prop::collection::vec(0.0f64..1.0, 1..40)) {
            let mut selector = ModelSelector::new(Criterion::F1);
            let mut previous = selector.best_value();
            for (i, f1) in scores.iter().enumerate() {
                let improved = selector.observe(i + 1, &fit(0.0, *f1));
                let current = selector.best_value();
                prop_assert!(current >= previous);
                prop_assert_eq!(improved, current > previous);
                previous = current;
            }
            prop_assert!(selector.best_epoch().is_some());
        }
    }
}

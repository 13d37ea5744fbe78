//! Raw datasets and the sources that provide them by name.

use crate::data::graph::{Graph, NodeLabels};
use crate::error::MlError;
use sagebench_core::{DatasetSpec, TaskType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Graphs pre-partitioned into train/val/test collections (one graph per
/// example, PPI style).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphCollection {
    pub train: Vec<Graph>,
    pub val: Vec<Graph>,
    pub test: Vec<Graph>,
}

/// A dataset as delivered by a [`DatasetSource`], before splitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawDataset {
    /// One graph with `train`/`val`/`test` node masks.
    Single(Graph),
    Collection(GraphCollection),
}

impl RawDataset {
    /// Load a dataset serialized as JSON.
    pub fn from_json_file(path: &Path) -> Result<Self, MlError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn graphs(&self) -> Vec<&Graph> {
        match self {
            Self::Single(graph) => vec![graph],
            Self::Collection(c) => c.train.iter().chain(&c.val).chain(&c.test).collect(),
        }
    }

    fn graphs_mut(&mut self) -> Vec<&mut Graph> {
        match self {
            Self::Single(graph) => vec![graph],
            Self::Collection(c) => c
                .train
                .iter_mut()
                .chain(c.val.iter_mut())
                .chain(c.test.iter_mut())
                .collect(),
        }
    }

    /// Row-normalize node features of every graph.
    pub fn row_normalize(&mut self) {
        for graph in self.graphs_mut() {
            graph.row_normalize();
        }
    }

    /// Check label kind, label range and feature width against the catalog entry.
    pub fn check_spec(&self, spec: &DatasetSpec) -> Result<(), MlError> {
        for graph in self.graphs() {
            if graph.num_features() != spec.num_node_features {
                return Err(MlError::dataset(format!(
                    "graph has {} node features, catalog declares {}",
                    graph.num_features(),
                    spec.num_node_features
                )));
            }
            match (graph.labels(), spec.task_type) {
                (NodeLabels::Single(labels), TaskType::SingleLabel) => {
                    if let Some(bad) = labels.iter().find(|&&l| l >= spec.num_classes) {
                        return Err(MlError::dataset(format!(
                            "label {bad} out of range for {} classes",
                            spec.num_classes
                        )));
                    }
                }
                (NodeLabels::Multi(labels), TaskType::MultiLabel) => {
                    if labels.ncols() != spec.num_classes {
                        return Err(MlError::dataset(format!(
                            "label matrix has {} columns, catalog declares {} classes",
                            labels.ncols(),
                            spec.num_classes
                        )));
                    }
                }
                (_, task) => {
                    return Err(MlError::dataset(format!(
                        "labels do not match task type {task}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Provides raw datasets by name.
pub trait DatasetSource {
    fn load(&self, name: &str) -> Result<RawDataset, MlError>;
}

fn unsupported(name: &str) -> MlError {
    tracing::error!(dataset = name, "Unsupported dataset.");
    MlError::UnsupportedDataset(name.to_string())
}

/// In-memory registry of datasets.
#[derive(Debug, Clone, Default)]
pub struct DatasetRegistry {
    datasets: BTreeMap<String, RawDataset>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, dataset: RawDataset) {
        self.datasets.insert(name.to_string(), dataset);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }
}

impl DatasetSource for DatasetRegistry {
    fn load(&self, name: &str) -> Result<RawDataset, MlError> {
        self.datasets.get(name).cloned().ok_or_else(|| unsupported(name))
    }
}

/// Datasets stored as `<dir>/<name>.json`.
#[derive(Debug, Clone)]
pub struct JsonDirectorySource {
    dir: PathBuf,
}

impl JsonDirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl DatasetSource for JsonDirectorySource {
    fn load(&self, name: &str) -> Result<RawDataset, MlError> {
        let path = self.dir.join(format!("{name}.json"));
        if !path.is_file() {
            return Err(unsupported(name));
        }
        tracing::debug!(path = %path.display(), "Loading dataset");
        RawDataset::from_json_file(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use tempfile::TempDir;

    fn tiny() -> RawDataset {
        RawDataset::Single(
            Graph::new(2, vec![(0, 1)], Array2::ones((2, 3)), NodeLabels::Single(vec![0, 1]))
                .unwrap(),
        )
    }

    fn spec(task_type: TaskType) -> DatasetSpec {
        DatasetSpec {
            task_type,
            num_node_features: 3,
            num_classes: 2,
        }
    }

    #[test]
    fn test_registry_unknown_name() {
        let mut registry = DatasetRegistry::new();
        registry.register("tiny", tiny());
        assert!(registry.load("tiny").is_ok());
        assert!(matches!(
            registry.load("Cora"),
            Err(MlError::UnsupportedDataset(name)) if name == "Cora"
        ));
    }

    #[test]
    fn test_json_directory_source() {
        let dir = TempDir::new().unwrap();
        let json = serde_json::to_string(&tiny()).unwrap();
        std::fs::write(dir.path().join("tiny.json"), json).unwrap();

        let source = JsonDirectorySource::new(dir.path());
        match source.load("tiny").unwrap() {
            RawDataset::Single(g) => assert_eq!(g.num_nodes(), 2),
            RawDataset::Collection(_) => panic!("expected a single graph"),
        }
        assert!(matches!(
            source.load("missing"),
            Err(MlError::UnsupportedDataset(_))
        ));
    }

    #[test]
    fn test_check_spec() {
        let data = tiny();
        assert!(data.check_spec(&spec(TaskType::SingleLabel)).is_ok());
        assert!(data.check_spec(&spec(TaskType::MultiLabel)).is_err());

        let mut narrow = spec(TaskType::SingleLabel);
        narrow.num_classes = 1;
        assert!(data.check_spec(&narrow).is_err());
    }

    #[test]
    fn test_row_normalize_all_graphs() {
        let mut data = tiny();
        data.row_normalize();
        let RawDataset::Single(g) = data else {
            panic!("expected a single graph")
        };
        assert!((g.features().row(0).sum() - 1.0).abs() < 1e-6);
    }
}

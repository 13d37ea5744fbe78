//! Train/validation/test views of a dataset.
//!
//! A [`DataSplitter`] turns a [`RawDataset`] into a [`GraphSplit`]:
//!
//! - **transductive**: the three views share one graph; only the masks tell
//!   the phases apart.
//! - **strict inductive** (`default`/`strict`): each view is the subgraph
//!   induced by its mask, so message passing never crosses phases.
//! - **soft inductive**: only the training view is cut out; validation and
//!   test run on the full graph.
//! - **graph collection**: each view is the disjoint union of its graphs with
//!   an all-true mask for its own phase.

use crate::data::dataset::{GraphCollection, RawDataset};
use crate::data::graph::{Graph, SplitMask};
use crate::error::MlError;
use sagebench_core::{Framework, InductiveOption, ResolvedConfig, SoftTrainMask};
use std::sync::Arc;

/// The graph each phase trains or evaluates on.
#[derive(Debug, Clone)]
pub struct GraphSplit {
    pub train: Arc<Graph>,
    pub val: Arc<Graph>,
    pub test: Arc<Graph>,
}

impl GraphSplit {
    pub fn view(&self, phase: SplitMask) -> &Arc<Graph> {
        match phase {
            SplitMask::Train => &self.train,
            SplitMask::Val => &self.val,
            SplitMask::Test => &self.test,
        }
    }

    /// Whether all three views are the same graph object.
    pub fn is_shared(&self) -> bool {
        Arc::ptr_eq(&self.train, &self.val) && Arc::ptr_eq(&self.val, &self.test)
    }
}

/// How a single graph is divided between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitPolicy {
    Transductive,
    StrictInductive,
    /// Training view induced by `train_source`; inference views see everything.
    SoftInductive { train_source: SplitMask },
}

impl SplitPolicy {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        let general = &config.general;
        match (general.framework, general.inductive_option) {
            (Framework::Transductive, _) => Self::Transductive,
            (Framework::Inductive, Some(InductiveOption::Soft)) => Self::SoftInductive {
                train_source: match general.soft_train_mask {
                    SoftTrainMask::Train => SplitMask::Train,
                    SoftTrainMask::Val => SplitMask::Val,
                },
            },
            (Framework::Inductive, _) => Self::StrictInductive,
        }
    }
}

/// Produces the three phase views of a dataset.
#[derive(Debug, Clone, Copy)]
pub struct DataSplitter {
    policy: SplitPolicy,
}

impl DataSplitter {
    pub fn new(policy: SplitPolicy) -> Self {
        Self { policy }
    }

    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self::new(SplitPolicy::from_config(config))
    }

    pub fn policy(&self) -> SplitPolicy {
        self.policy
    }

    pub fn split(&self, raw: RawDataset) -> Result<GraphSplit, MlError> {
        match raw {
            RawDataset::Single(graph) => self.split_single(graph),
            RawDataset::Collection(collection) => split_collection(collection),
        }
    }

    fn split_single(&self, graph: Graph) -> Result<GraphSplit, MlError> {
        match self.policy {
            SplitPolicy::Transductive => {
                tracing::info!("Using data split for transductive training.");
                check_disjoint(&graph)?;
                let shared = Arc::new(graph);
                Ok(GraphSplit {
                    train: Arc::clone(&shared),
                    val: Arc::clone(&shared),
                    test: shared,
                })
            }
            SplitPolicy::StrictInductive => {
                tracing::info!("Using data split for strict inductive learning.");
                check_disjoint(&graph)?;
                Ok(GraphSplit {
                    train: Arc::new(graph.subgraph(required_mask(&graph, SplitMask::Train)?)?),
                    val: Arc::new(graph.subgraph(required_mask(&graph, SplitMask::Val)?)?),
                    test: Arc::new(graph.subgraph(required_mask(&graph, SplitMask::Test)?)?),
                })
            }
            SplitPolicy::SoftInductive { train_source } => {
                tracing::info!(
                    train_source = %train_source,
                    "Using data split for non-strict inductive learning."
                );
                for kind in SplitMask::ALL {
                    required_mask(&graph, kind)?;
                }
                let train = graph.subgraph(required_mask(&graph, train_source)?)?;
                let full = Arc::new(graph);
                Ok(GraphSplit {
                    train: Arc::new(train),
                    val: Arc::clone(&full),
                    test: full,
                })
            }
        }
    }
}

fn required_mask(graph: &Graph, kind: SplitMask) -> Result<&[bool], MlError> {
    graph
        .mask(kind)
        .ok_or_else(|| MlError::split(format!("graph has no {kind} mask")))
}

fn check_disjoint(graph: &Graph) -> Result<(), MlError> {
    let train = required_mask(graph, SplitMask::Train)?;
    let val = required_mask(graph, SplitMask::Val)?;
    let test = required_mask(graph, SplitMask::Test)?;
    let overlap = (0..graph.num_nodes())
        .find(|&i| [train[i], val[i], test[i]].iter().filter(|&&m| m).count() > 1);
    match overlap {
        Some(node) => Err(MlError::split(format!(
            "node {node} is flagged by more than one split mask"
        ))),
        None => Ok(()),
    }
}

fn split_collection(collection: GraphCollection) -> Result<GraphSplit, MlError> {
    tracing::info!(
        train_graphs = collection.train.len(),
        val_graphs = collection.val.len(),
        test_graphs = collection.test.len(),
        "Batching graph collection into phase views."
    );
    let batch_view = |graphs: &[Graph], kind: SplitMask| -> Result<Arc<Graph>, MlError> {
        if graphs.is_empty() {
            return Err(MlError::split(format!("{kind} collection is empty")));
        }
        let mut union = Graph::batch(graphs)?;
        let all = vec![true; union.num_nodes()];
        union.set_mask(kind, all)?;
        Ok(Arc::new(union))
    };
    Ok(GraphSplit {
        train: batch_view(&collection.train, SplitMask::Train)?,
        val: batch_view(&collection.val, SplitMask::Val)?,
        test: batch_view(&collection.test, SplitMask::Test)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::graph::NodeLabels;
    use ndarray::Array2;

    /// Ten-node ring with train {0..5}, val {6,7}, test {8,9}.
    fn ring() -> Graph {
        let n = 10;
        let edges = (0..n).flat_map(|i| [(i, (i + 1) % n), ((i + 1) % n, i)]).collect();
        Graph::new(n, edges, Array2::ones((n, 2)), NodeLabels::Single(vec![0; n]))
            .unwrap()
            .with_mask(SplitMask::Train, (0..n).map(|i| i < 6).collect())
            .unwrap()
            .with_mask(SplitMask::Val, (0..n).map(|i| i == 6 || i == 7).collect())
            .unwrap()
            .with_mask(SplitMask::Test, (0..n).map(|i| i >= 8).collect())
            .unwrap()
    }

    #[test]
    fn test_transductive_shares_graph() {
        let split = DataSplitter::new(SplitPolicy::Transductive)
            .split(RawDataset::Single(ring()))
            .unwrap();
        assert!(split.is_shared());
        assert_eq!(split.train.masked_nodes(SplitMask::Train), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(split.val.masked_nodes(SplitMask::Val), vec![6, 7]);
    }

    #[test]
    fn test_overlapping_masks_rejected() {
        let mut g = ring();
        g.set_mask(SplitMask::Val, (0..10).map(|i| i >= 5).collect()).unwrap();
        let err = DataSplitter::new(SplitPolicy::Transductive)
            .split(RawDataset::Single(g))
            .unwrap_err();
        assert!(matches!(err, MlError::Split(_)));
    }

    #[test]
    fn test_strict_inductive_cuts_cross_edges() {
        let split = DataSplitter::new(SplitPolicy::StrictInductive)
            .split(RawDataset::Single(ring()))
            .unwrap();
        assert_eq!(split.train.num_nodes(), 6);
        assert_eq!(split.val.parent_ids(), &[6, 7]);
        assert_eq!(split.test.parent_ids(), &[8, 9]);
        // Path 0-1-2-3-4-5 keeps 5 undirected edges; the wrap-around 9-0 is cut.
        assert_eq!(split.train.num_edges(), 10);
        assert_eq!(split.val.num_edges(), 2);
        assert_eq!(split.val.masked_nodes(SplitMask::Val), vec![0, 1]);
    }

    #[test]
    fn test_soft_inductive_with_train_source() {
        let split = DataSplitter::new(SplitPolicy::SoftInductive {
            train_source: SplitMask::Train,
        })
        .split(RawDataset::Single(ring()))
        .unwrap();
        assert!(Arc::ptr_eq(&split.val, &split.test));
        assert_eq!(split.val.num_nodes(), 10);
        assert_eq!(split.train.parent_ids(), &[0, 1, 2, 3, 4, 5]);
        assert_eq!(split.train.masked_nodes(SplitMask::Train).len(), 6);
    }

    #[test]
    fn test_soft_inductive_with_val_source_has_no_train_targets() {
        let split = DataSplitter::new(SplitPolicy::SoftInductive {
            train_source: SplitMask::Val,
        })
        .split(RawDataset::Single(ring()))
        .unwrap();
        assert_eq!(split.train.parent_ids(), &[6, 7]);
        assert!(split.train.masked_nodes(SplitMask::Train).is_empty());
    }

    #[test]
    fn test_collection_synthesizes_view_masks() {
        let graph = |n: usize| {
            Graph::new(n, vec![], Array2::zeros((n, 1)), NodeLabels::Multi(Array2::zeros((n, 2))))
                .unwrap()
        };
        let collection = GraphCollection {
            train: vec![graph(3), graph(4)],
            val: vec![graph(2)],
            test: vec![graph(5)],
        };
        let split = DataSplitter::new(SplitPolicy::Transductive)
            .split(RawDataset::Collection(collection))
            .unwrap();

        assert_eq!(split.train.mask(SplitMask::Train), Some(&[true; 7][..]));
        assert!(split.train.mask(SplitMask::Val).is_none());
        assert_eq!(split.val.masked_nodes(SplitMask::Val), vec![0, 1]);
        assert!(split.val.mask(SplitMask::Train).is_none());
        assert_eq!(split.test.component_sizes(), &[5]);
    }

    #[test]
    fn test_missing_mask() {
        let g = Graph::new(2, vec![], Array2::zeros((2, 1)), NodeLabels::Single(vec![0, 0])).unwrap();
        let err = DataSplitter::new(SplitPolicy::StrictInductive)
            .split(RawDataset::Single(g))
            .unwrap_err();
        assert!(err.to_string().contains("train mask"));
    }
}

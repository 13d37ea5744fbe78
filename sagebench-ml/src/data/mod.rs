//! Graph data, dataset sources and phase splitting.

pub mod dataset;
pub mod graph;
pub mod split;

pub use dataset::{DatasetRegistry, DatasetSource, GraphCollection, JsonDirectorySource, RawDataset};
pub use graph::{Graph, NodeLabels, SplitMask};
pub use split::{DataSplitter, GraphSplit, SplitPolicy};

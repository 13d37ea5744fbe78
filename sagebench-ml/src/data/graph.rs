//! Graph data model: node features, labels, split masks and in-neighbor
//! adjacency.

use crate::error::MlError;
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

/// Named boolean node mask selecting one phase's supervision targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMask {
    Train,
    Val,
    Test,
}

impl SplitMask {
    pub const ALL: [SplitMask; 3] = [SplitMask::Train, SplitMask::Val, SplitMask::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Val => "val",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for SplitMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-node ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeLabels {
    /// One class index per node.
    Single(Vec<usize>),
    /// `[num_nodes, num_classes]` indicator matrix (1.0 = positive).
    Multi(Array2<f32>),
}

impl NodeLabels {
    pub fn len(&self) -> usize {
        match self {
            Self::Single(labels) => labels.len(),
            Self::Multi(labels) => labels.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_multilabel(&self) -> bool {
        matches!(self, Self::Multi(_))
    }

    /// Labels of `nodes`, in the given order.
    pub fn select(&self, nodes: &[usize]) -> NodeLabels {
        match self {
            Self::Single(labels) => Self::Single(nodes.iter().map(|&n| labels[n]).collect()),
            Self::Multi(labels) => Self::Multi(labels.select(Axis(0), nodes)),
        }
    }

    /// Stack label blocks of the same kind.
    pub fn concat(parts: &[&NodeLabels]) -> Result<NodeLabels, MlError> {
        match parts.first() {
            None => Err(MlError::dataset("cannot concatenate an empty label list")),
            Some(Self::Single(_)) => {
                let mut out = Vec::new();
                for part in parts {
                    match part {
                        Self::Single(labels) => out.extend_from_slice(labels),
                        Self::Multi(_) => {
                            return Err(MlError::dataset("mixed single- and multi-label graphs"));
                        }
                    }
                }
                Ok(Self::Single(out))
            }
            Some(Self::Multi(_)) => {
                let mut views: Vec<ArrayView2<'_, f32>> = Vec::with_capacity(parts.len());
                for part in parts {
                    match part {
                        Self::Multi(labels) => views.push(labels.view()),
                        Self::Single(_) => {
                            return Err(MlError::dataset("mixed single- and multi-label graphs"));
                        }
                    }
                }
                ndarray::concatenate(Axis(0), &views)
                    .map(Self::Multi)
                    .map_err(|e| MlError::dataset(format!("label shapes disagree: {e}")))
            }
        }
    }
}

/// A homogeneous directed graph with node data.
///
/// Edges run `src -> dst`; messages flow along edges, so a node aggregates
/// over its in-neighbors. Graphs built by [`Graph::batch`] remember the
/// sizes of the graphs they were assembled from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "GraphRecord", into = "GraphRecord")]
pub struct Graph {
    num_nodes: usize,
    src: Vec<usize>,
    dst: Vec<usize>,
    features: Array2<f32>,
    labels: NodeLabels,
    masks: BTreeMap<SplitMask, Vec<bool>>,
    /// Node id in the graph this one was derived from.
    parent_ids: Vec<usize>,
    component_sizes: Vec<usize>,
    in_offsets: Vec<usize>,
    in_sources: Vec<usize>,
}

impl Graph {
    pub fn new(
        num_nodes: usize,
        edges: Vec<(usize, usize)>,
        features: Array2<f32>,
        labels: NodeLabels,
    ) -> Result<Self, MlError> {
        let (src, dst): (Vec<usize>, Vec<usize>) = edges.into_iter().unzip();
        Self::from_parts(
            num_nodes,
            src,
            dst,
            features,
            labels,
            BTreeMap::new(),
            (0..num_nodes).collect(),
            vec![num_nodes],
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn from_parts(
        num_nodes: usize,
        src: Vec<usize>,
        dst: Vec<usize>,
        features: Array2<f32>,
        labels: NodeLabels,
        masks: BTreeMap<SplitMask, Vec<bool>>,
        parent_ids: Vec<usize>,
        component_sizes: Vec<usize>,
    ) -> Result<Self, MlError> {
        if features.nrows() != num_nodes {
            return Err(MlError::dataset(format!(
                "feature matrix has {} rows for {num_nodes} nodes",
                features.nrows()
            )));
        }
        if labels.len() != num_nodes {
            return Err(MlError::dataset(format!(
                "{} labels for {num_nodes} nodes",
                labels.len()
            )));
        }
        if let Some(bad) = src.iter().chain(dst.iter()).find(|&&n| n >= num_nodes) {
            return Err(MlError::dataset(format!(
                "edge endpoint {bad} out of range for {num_nodes} nodes"
            )));
        }
        for (kind, mask) in &masks {
            if mask.len() != num_nodes {
                return Err(MlError::dataset(format!(
                    "{kind} mask has {} entries for {num_nodes} nodes",
                    mask.len()
                )));
            }
        }
        if parent_ids.len() != num_nodes || component_sizes.iter().sum::<usize>() != num_nodes {
            return Err(MlError::dataset("node bookkeeping does not match node count"));
        }

        // In-neighbor CSR, sources kept in edge order.
        let mut in_offsets = vec![0usize; num_nodes + 1];
        for &d in &dst {
            in_offsets[d + 1] += 1;
        }
        for i in 0..num_nodes {
            in_offsets[i + 1] += in_offsets[i];
        }
        let mut cursor = in_offsets.clone();
        let mut in_sources = vec![0usize; src.len()];
        for (&s, &d) in src.iter().zip(&dst) {
            in_sources[cursor[d]] = s;
            cursor[d] += 1;
        }

        Ok(Self {
            num_nodes,
            src,
            dst,
            features,
            labels,
            masks,
            parent_ids,
            component_sizes,
            in_offsets,
            in_sources,
        })
    }

    /// Attach (or replace) a split mask.
    pub fn with_mask(mut self, kind: SplitMask, mask: Vec<bool>) -> Result<Self, MlError> {
        self.set_mask(kind, mask)?;
        Ok(self)
    }

    pub fn set_mask(&mut self, kind: SplitMask, mask: Vec<bool>) -> Result<(), MlError> {
        if mask.len() != self.num_nodes {
            return Err(MlError::dataset(format!(
                "{kind} mask has {} entries for {} nodes",
                mask.len(),
                self.num_nodes
            )));
        }
        self.masks.insert(kind, mask);
        Ok(())
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_edges(&self) -> usize {
        self.src.len()
    }

    pub fn num_features(&self) -> usize {
        self.features.ncols()
    }

    /// Edges as `(src, dst)` pairs.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.src.iter().copied().zip(self.dst.iter().copied())
    }

    pub fn features(&self) -> &Array2<f32> {
        &self.features
    }

    pub fn labels(&self) -> &NodeLabels {
        &self.labels
    }

    pub fn mask(&self, kind: SplitMask) -> Option<&[bool]> {
        self.masks.get(&kind).map(Vec::as_slice)
    }

    /// Nodes flagged by `kind`, ascending. Empty when the mask is absent.
    pub fn masked_nodes(&self, kind: SplitMask) -> Vec<usize> {
        self.mask(kind)
            .map(|mask| {
                mask.iter()
                    .enumerate()
                    .filter_map(|(i, &m)| m.then_some(i))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn in_neighbors(&self, node: usize) -> &[usize] {
        &self.in_sources[self.in_offsets[node]..self.in_offsets[node + 1]]
    }

    pub fn parent_ids(&self) -> &[usize] {
        &self.parent_ids
    }

    pub fn component_sizes(&self) -> &[usize] {
        &self.component_sizes
    }

    /// Node id ranges of the constituent graphs.
    pub fn component_ranges(&self) -> Vec<Range<usize>> {
        let mut start = 0;
        self.component_sizes
            .iter()
            .map(|&size| {
                let range = start..start + size;
                start += size;
                range
            })
            .collect()
    }

    /// Feature rows of `nodes`, in the given order.
    pub fn gather_features(&self, nodes: &[usize]) -> Array2<f32> {
        self.features.select(Axis(0), nodes)
    }

    /// Scale each feature row to sum to one. All-zero rows are left alone.
    pub fn row_normalize(&mut self) {
        for mut row in self.features.rows_mut() {
            let sum: f32 = row.sum();
            if sum != 0.0 {
                row.mapv_inplace(|v| v / sum);
            }
        }
    }

    /// Vertex-induced subgraph on the nodes where `keep` is true.
    ///
    /// Node order is preserved; node data and masks are sliced and only edges
    /// with both endpoints kept survive.
    pub fn subgraph(&self, keep: &[bool]) -> Result<Graph, MlError> {
        if keep.len() != self.num_nodes {
            return Err(MlError::split(format!(
                "subgraph selector has {} entries for {} nodes",
                keep.len(),
                self.num_nodes
            )));
        }
        let kept: Vec<usize> = (0..self.num_nodes).filter(|&i| keep[i]).collect();
        let mut remap = vec![usize::MAX; self.num_nodes];
        for (new, &old) in kept.iter().enumerate() {
            remap[old] = new;
        }

        let (src, dst): (Vec<usize>, Vec<usize>) = self
            .edges()
            .filter(|&(s, d)| keep[s] && keep[d])
            .map(|(s, d)| (remap[s], remap[d]))
            .unzip();

        let masks = self
            .masks
            .iter()
            .map(|(kind, mask)| (*kind, kept.iter().map(|&i| mask[i]).collect()))
            .collect();

        let component_sizes: Vec<usize> = self
            .component_ranges()
            .into_iter()
            .map(|range| range.filter(|&i| keep[i]).count())
            .filter(|&n| n > 0)
            .collect();

        Self::from_parts(
            kept.len(),
            src,
            dst,
            self.gather_features(&kept),
            self.labels.select(&kept),
            masks,
            kept.iter().map(|&i| self.parent_ids[i]).collect(),
            if kept.is_empty() { vec![0] } else { component_sizes },
        )
    }

    /// Disjoint union of `graphs`. Masks are not carried over.
    pub fn batch(graphs: &[Graph]) -> Result<Graph, MlError> {
        let first = graphs
            .first()
            .ok_or_else(|| MlError::dataset("cannot batch an empty graph collection"))?;
        let num_features = first.num_features();
        if let Some(g) = graphs.iter().find(|g| g.num_features() != num_features) {
            return Err(MlError::dataset(format!(
                "feature width {} does not match {num_features}",
                g.num_features()
            )));
        }

        let num_nodes = graphs.iter().map(Graph::num_nodes).sum();
        let mut src = Vec::new();
        let mut dst = Vec::new();
        let mut parent_ids = Vec::with_capacity(num_nodes);
        let mut component_sizes = Vec::new();
        let mut offset = 0;
        for g in graphs {
            src.extend(g.src.iter().map(|s| s + offset));
            dst.extend(g.dst.iter().map(|d| d + offset));
            parent_ids.extend_from_slice(&g.parent_ids);
            component_sizes.extend_from_slice(&g.component_sizes);
            offset += g.num_nodes;
        }

        let views: Vec<ArrayView2<'_, f32>> = graphs.iter().map(|g| g.features.view()).collect();
        let features = ndarray::concatenate(Axis(0), &views)
            .map_err(|e| MlError::dataset(format!("feature shapes disagree: {e}")))?;
        let labels = NodeLabels::concat(&graphs.iter().map(|g| &g.labels).collect::<Vec<_>>())?;

        Self::from_parts(
            num_nodes,
            src,
            dst,
            features,
            labels,
            BTreeMap::new(),
            parent_ids,
            component_sizes,
        )
    }
}

/// Serialized form of a [`Graph`]; adjacency is rebuilt on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphRecord {
    num_nodes: usize,
    edges: Vec<(usize, usize)>,
    features: Array2<f32>,
    labels: NodeLabels,
    #[serde(default)]
    masks: BTreeMap<SplitMask, Vec<bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_ids: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    component_sizes: Option<Vec<usize>>,
}

impl From<Graph> for GraphRecord {
    fn from(graph: Graph) -> Self {
        let edges = graph.edges().collect();
        Self {
            num_nodes: graph.num_nodes,
            edges,
            features: graph.features,
            labels: graph.labels,
            masks: graph.masks,
            parent_ids: Some(graph.parent_ids),
            component_sizes: Some(graph.component_sizes),
        }
    }
}

impl TryFrom<GraphRecord> for Graph {
    type Error = MlError;

    fn try_from(record: GraphRecord) -> Result<Self, Self::Error> {
        let (src, dst) = record.edges.into_iter().unzip();
        Self::from_parts(
            record.num_nodes,
            src,
            dst,
            record.features,
            record.labels,
            record.masks,
            record
                .parent_ids
                .unwrap_or_else(|| (0..record.num_nodes).collect()),
            record
                .component_sizes
                .unwrap_or_else(|| vec![record.num_nodes]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use pretty_assertions::assert_eq;

    fn path_graph(n: usize) -> Graph {
        let edges = (0..n - 1).flat_map(|i| [(i, i + 1), (i + 1, i)]).collect();
        let features = Array2::from_shape_fn((n, 2), |(i, j)| (i + j) as f32);
        Graph::new(n, edges, features, NodeLabels::Single((0..n).map(|i| i % 2).collect())).unwrap()
    }

    #[test]
    fn test_in_neighbors() {
        let g = path_graph(4);
        assert_eq!(g.num_edges(), 6);
        assert_eq!(g.in_neighbors(0), &[1]);
        assert_eq!(g.in_neighbors(1), &[0, 2]);
        assert_eq!(g.in_neighbors(3), &[2]);
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let features = Array2::zeros((3, 1));
        assert!(Graph::new(2, vec![], features, NodeLabels::Single(vec![0, 0])).is_err());

        let features = Array2::zeros((2, 1));
        assert!(Graph::new(2, vec![(0, 5)], features, NodeLabels::Single(vec![0, 0])).is_err());

        let g = path_graph(3);
        assert!(g.with_mask(SplitMask::Train, vec![true]).is_err());
    }

    #[test]
    fn test_subgraph_slices_node_data() {
        let g = path_graph(5)
            .with_mask(SplitMask::Train, vec![true, true, false, false, true])
            .unwrap();
        let sub = g.subgraph(&[true, true, false, false, true]).unwrap();

        assert_eq!(sub.num_nodes(), 3);
        assert_eq!(sub.parent_ids(), &[0, 1, 4]);
        // Only 0<->1 survives; 4's neighbor (3) was dropped.
        let edges: Vec<_> = sub.edges().collect();
        assert_eq!(edges, vec![(0, 1), (1, 0)]);
        assert_eq!(sub.mask(SplitMask::Train), Some(&[true, true, true][..]));
        assert_eq!(sub.labels(), &NodeLabels::Single(vec![0, 1, 0]));
        assert_eq!(sub.features().row(2).to_vec(), vec![4.0, 5.0]);
    }

    #[test]
    fn test_batch_offsets_components() {
        let a = path_graph(2);
        let b = path_graph(3);
        let union = Graph::batch(&[a, b]).unwrap();

        assert_eq!(union.num_nodes(), 5);
        assert_eq!(union.component_sizes(), &[2, 3]);
        assert_eq!(union.component_ranges(), vec![0..2, 2..5]);
        assert!(union.edges().all(|(s, d)| (s < 2) == (d < 2)));
        assert_eq!(union.in_neighbors(3), &[2, 4]);
        assert!(union.mask(SplitMask::Train).is_none());
    }

    #[test]
    fn test_batch_rejects_mixed_labels() {
        let a = path_graph(2);
        let b = Graph::new(1, vec![], Array2::zeros((1, 2)), NodeLabels::Multi(Array2::zeros((1, 3))))
            .unwrap();
        assert!(Graph::batch(&[a, b]).is_err());
        assert!(Graph::batch(&[]).is_err());
    }

    #[test]
    fn test_row_normalize() {
        let mut g = Graph::new(
            2,
            vec![],
            array![[1.0, 3.0], [0.0, 0.0]],
            NodeLabels::Single(vec![0, 1]),
        )
        .unwrap();
        g.row_normalize();
        assert_eq!(g.features(), &array![[0.25, 0.75], [0.0, 0.0]]);
    }

    #[test]
    fn test_json_rebuilds_adjacency() {
        let g = path_graph(3).with_mask(SplitMask::Val, vec![false, true, false]).unwrap();
        let json = serde_json::to_string(&g).unwrap();
        let back: Graph = serde_json::from_str(&json).unwrap();
        assert_eq!(back.in_neighbors(1), g.in_neighbors(1));
        assert_eq!(back.masked_nodes(SplitMask::Val), vec![1]);
    }
}

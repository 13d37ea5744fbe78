//! Mini-batches of message-flow blocks.

use crate::data::graph::NodeLabels;
use ndarray::Array2;

/// One message-passing layer of a mini-batch.
///
/// Destination nodes are the first `num_dst` entries of `src_nodes`, so a
/// layer can read a node's own previous representation at the same index.
/// Edge endpoints are indices into `src_nodes`.
#[derive(Debug, Clone)]
pub struct Block {
    pub src_nodes: Vec<usize>,
    pub num_dst: usize,
    pub edge_src: Vec<usize>,
    pub edge_dst: Vec<usize>,
    /// Features of `src_nodes`, row-aligned.
    pub src_features: Array2<f32>,
}

impl Block {
    pub fn num_src(&self) -> usize {
        self.src_nodes.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edge_src.len()
    }

    pub fn dst_nodes(&self) -> &[usize] {
        &self.src_nodes[..self.num_dst]
    }

    /// In-degree of every destination node.
    pub fn in_degrees(&self) -> Vec<usize> {
        let mut degrees = vec![0; self.num_dst];
        for &d in &self.edge_dst {
            degrees[d] += 1;
        }
        degrees
    }
}

/// One loader item.
///
/// `blocks[0]` consumes the input features; the last block produces the
/// representations of `output_nodes`.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Nodes whose features feed the first layer.
    pub input_nodes: Vec<usize>,
    /// Supervision targets (the seed nodes).
    pub output_nodes: Vec<usize>,
    pub blocks: Vec<Block>,
    /// Labels of `output_nodes`, row-aligned.
    pub labels: NodeLabels,
}

impl Batch {
    pub fn num_targets(&self) -> usize {
        self.output_nodes.len()
    }

    pub fn input_features(&self) -> Option<&Array2<f32>> {
        self.blocks.first().map(|block| &block.src_features)
    }
}

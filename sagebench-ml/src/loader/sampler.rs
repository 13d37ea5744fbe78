//! Layer-wise neighbor sampling.

use crate::data::graph::Graph;
use crate::error::MlError;
use crate::loader::batch::{Batch, Block};
use rand::Rng;
use rand::seq::index;
use std::collections::HashMap;

/// Per-layer neighbor limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fanout {
    /// Aggregate over every in-neighbor.
    All,
    /// Sample at most this many in-neighbors without replacement.
    Limit(usize),
}

impl Fanout {
    /// Negative configuration values mean "all neighbors".
    pub fn from_config(value: i64) -> Self {
        usize::try_from(value).map_or(Self::All, Self::Limit)
    }
}

/// Builds message-flow blocks outward from a set of seed nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborSampler {
    /// One entry per model layer, input layer first.
    fanouts: Vec<Fanout>,
}

impl NeighborSampler {
    pub fn new(fanouts: Vec<Fanout>) -> Self {
        Self { fanouts }
    }

    /// Full-neighborhood sampler for `num_layers` layers.
    pub fn full(num_layers: usize) -> Self {
        Self::new(vec![Fanout::All; num_layers])
    }

    pub fn fanouts(&self) -> &[Fanout] {
        &self.fanouts
    }

    pub fn num_layers(&self) -> usize {
        self.fanouts.len()
    }

    /// Sample the blocks needed to compute `seeds` and pack them into a batch.
    ///
    /// Sampling walks from the seeds outward, so the last fan-out is applied
    /// first.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        graph: &Graph,
        seeds: &[usize],
        rng: &mut R,
    ) -> Result<Batch, MlError> {
        if let Some(&bad) = seeds.iter().find(|&&s| s >= graph.num_nodes()) {
            return Err(MlError::loader(format!(
                "seed node {bad} out of range for {} nodes",
                graph.num_nodes()
            )));
        }

        let mut dst = seeds.to_vec();
        let mut blocks = Vec::with_capacity(self.fanouts.len());
        for &fanout in self.fanouts.iter().rev() {
            let mut src_nodes = dst.clone();
            let mut local: HashMap<usize, usize> =
                dst.iter().enumerate().map(|(i, &n)| (n, i)).collect();
            let mut edge_src = Vec::new();
            let mut edge_dst = Vec::new();

            for (d_local, &d) in dst.iter().enumerate() {
                let neighbors = graph.in_neighbors(d);
                let picked: Vec<usize> = match fanout {
                    Fanout::Limit(k) if k < neighbors.len() => index::sample(rng, neighbors.len(), k)
                        .into_iter()
                        .map(|i| neighbors[i])
                        .collect(),
                    _ => neighbors.to_vec(),
                };
                for s in picked {
                    let s_local = *local.entry(s).or_insert_with(|| {
                        src_nodes.push(s);
                        src_nodes.len() - 1
                    });
                    edge_src.push(s_local);
                    edge_dst.push(d_local);
                }
            }

            let src_features = graph.gather_features(&src_nodes);
            blocks.push(Block {
                num_dst: dst.len(),
                src_nodes: src_nodes.clone(),
                edge_src,
                edge_dst,
                src_features,
            });
            dst = src_nodes;
        }
        blocks.reverse();

        Ok(Batch {
            input_nodes: dst,
            output_nodes: seeds.to_vec(),
            blocks,
            labels: graph.labels().select(seeds),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::graph::NodeLabels;
    use ndarray::Array2;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    /// Star: node 0 receives from 1..=5, node 1 receives from 6.
    fn star() -> Graph {
        let mut edges: Vec<(usize, usize)> = (1..=5).map(|i| (i, 0)).collect();
        edges.push((6, 1));
        let features = Array2::from_shape_fn((7, 1), |(i, _)| i as f32);
        Graph::new(7, edges, features, NodeLabels::Single(vec![0, 1, 0, 1, 0, 1, 0])).unwrap()
    }

    #[test]
    fn test_fanout_from_config() {
        assert_eq!(Fanout::from_config(-1), Fanout::All);
        assert_eq!(Fanout::from_config(0), Fanout::Limit(0));
        assert_eq!(Fanout::from_config(25), Fanout::Limit(25));
    }

    #[test]
    fn test_full_neighborhood_two_hops() {
        let batch = NeighborSampler::full(2)
            .sample(&star(), &[0], &mut StdRng::seed_from_u64(0))
            .unwrap();

        assert_eq!(batch.output_nodes, vec![0]);
        assert_eq!(batch.blocks.len(), 2);
        let last = &batch.blocks[1];
        assert_eq!(last.dst_nodes(), &[0]);
        assert_eq!(last.src_nodes, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(last.in_degrees(), vec![5]);
        // The outer hop reaches 6 through 1.
        assert_eq!(batch.input_nodes, vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(batch.blocks[0].num_dst, 6);
        assert_eq!(batch.input_features().unwrap().column(0).to_vec(), vec![
            0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0
        ]);
        assert_eq!(batch.labels, NodeLabels::Single(vec![0]));
    }

    #[test]
    fn test_limited_fanout_caps_degree() {
        let sampler = NeighborSampler::new(vec![Fanout::Limit(2)]);
        let batch = sampler
            .sample(&star(), &[0], &mut StdRng::seed_from_u64(3))
            .unwrap();
        let block = &batch.blocks[0];
        assert_eq!(block.num_edges(), 2);
        assert_eq!(block.num_src(), 3);
        assert!(block.src_nodes[1..].iter().all(|n| (1..=5).contains(n)));
    }

    #[test]
    fn test_sampling_is_seeded() {
        let sampler = NeighborSampler::new(vec![Fanout::Limit(2), Fanout::Limit(3)]);
        let g = star();
        let a = sampler.sample(&g, &[0, 1], &mut StdRng::seed_from_u64(9)).unwrap();
        let b = sampler.sample(&g, &[0, 1], &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a.input_nodes, b.input_nodes);
        assert_eq!(a.blocks[1].edge_src, b.blocks[1].edge_src);
    }

    #[test]
    fn test_rejects_out_of_range_seed() {
        let err = NeighborSampler::full(1)
            .sample(&star(), &[7], &mut StdRng::seed_from_u64(0))
            .unwrap_err();
        assert!(matches!(err, MlError::Loader(_)));
    }
}

//! Property-based tests for splitting and loading using proptest.

mod common;

use proptest::prelude::*;
use sagebench_ml::data::GraphCollection;
use sagebench_ml::loader::{LoaderOptions, WorkerPool};
use sagebench_ml::{
    DataLoader, DataSplitter, Graph, LoaderStrategy, NodeLabels, RawDataset, SplitMask, SplitPolicy,
};
use std::collections::BTreeSet;
use std::sync::Arc;

fn assignment(max_nodes: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(0u8..4, 1..max_nodes)
}

fn graph_and_edges() -> impl Strategy<Value = (Vec<u8>, Vec<(usize, usize)>)> {
    assignment(30).prop_flat_map(|assign| {
        let n = assign.len();
        let edges = prop::collection::vec((0..n, 0..n), 0..n * 3);
        (Just(assign), edges)
    })
}

// --- Transductive split properties ---

proptest! {
    #[test]
    fn transductive_masks_are_disjoint_and_shared(assign in assignment(40)) {
        let n = assign.len();
        let split = DataSplitter::new(SplitPolicy::Transductive)
            .split(RawDataset::Single(common::path_graph(n, &assign)))
            .unwrap();
        prop_assert!(split.is_shared());

        let view = split.view(SplitMask::Train);
        let masks: Vec<&[bool]> = SplitMask::ALL.iter().map(|&k| view.mask(k).unwrap()).collect();
        for i in 0..n {
            prop_assert!(masks.iter().filter(|m| m[i]).count() <= 1);
        }
        for kind in SplitMask::ALL {
            prop_assert_eq!(split.view(kind).num_edges(), view.num_edges());
            prop_assert_eq!(split.view(kind).num_nodes(), n);
        }
    }
}

// --- Strict inductive isolation ---

proptest! {
    #[test]
    fn strict_views_keep_only_inner_edges((assign, edges) in graph_and_edges()) {
        let n = assign.len();
        let graph = common::graph_with_edges(n, edges.clone(), &assign);
        let split = DataSplitter::new(SplitPolicy::StrictInductive)
            .split(RawDataset::Single(graph))
            .unwrap();

        for (k, kind) in SplitMask::ALL.into_iter().enumerate() {
            let view = split.view(kind);
            let parents = view.parent_ids();
            let members: BTreeSet<usize> = (0..n).filter(|&i| assign[i] == k as u8).collect();
            prop_assert_eq!(parents.iter().copied().collect::<BTreeSet<_>>(), members.clone());

            for (s, d) in view.edges() {
                prop_assert!(members.contains(&parents[s]));
                prop_assert!(members.contains(&parents[d]));
            }
            let inner = edges
                .iter()
                .filter(|(s, d)| members.contains(s) && members.contains(d))
                .count();
            prop_assert_eq!(view.num_edges(), inner);
        }
    }
}

// --- Loader coverage ---

proptest! {
    #[test]
    fn full_graph_loader_covers_mask_once(
        assign in assignment(60),
        batch_size in 1usize..9,
        shuffle in any::<bool>(),
        workers in 0usize..3,
    ) {
        let n = assign.len();
        let graph = Arc::new(common::path_graph(n, &assign));
        let loader = DataLoader::new(
            SplitMask::Train,
            Arc::clone(&graph),
            &LoaderStrategy::FullGraph,
            LoaderOptions { batch_size, num_layers: 2, shuffle, seed: 11 },
            WorkerPool::new(workers, false).unwrap(),
        )
        .unwrap();

        let masked = graph.masked_nodes(SplitMask::Train);
        prop_assert_eq!(loader.len(), masked.len().div_ceil(batch_size));

        let mut seen = Vec::new();
        let mut batches = 0;
        for batch in loader.iter(1).unwrap() {
            let batch = batch.unwrap();
            prop_assert!(batch.num_targets() <= batch_size);
            prop_assert_eq!(batch.labels.len(), batch.num_targets());
            seen.extend(batch.output_nodes);
            batches += 1;
        }
        prop_assert_eq!(batches, loader.len());
        let unique: BTreeSet<usize> = seen.iter().copied().collect();
        prop_assert_eq!(unique.len(), seen.len());
        prop_assert_eq!(unique, masked.into_iter().collect::<BTreeSet<_>>());
    }

    #[test]
    fn loader_epochs_are_reproducible(
        assign in assignment(40),
        batch_size in 1usize..6,
        epoch in 1usize..20,
    ) {
        let n = assign.len();
        let graph = Arc::new(common::path_graph(n, &assign));
        let order = |workers: usize| -> Vec<Vec<usize>> {
            DataLoader::new(
                SplitMask::Train,
                Arc::clone(&graph),
                &LoaderStrategy::FullGraph,
                LoaderOptions { batch_size, num_layers: 1, shuffle: true, seed: 5 },
                WorkerPool::new(workers, true).unwrap(),
            )
            .unwrap()
            .iter(epoch)
            .unwrap()
            .map(|b| b.unwrap().output_nodes)
            .collect()
        };
        prop_assert_eq!(order(0), order(2));
    }
}

// --- Graph batching synthesis ---

fn small_graph(n: usize) -> Graph {
    let edges = (1..n).map(|i| (i - 1, i)).collect();
    Graph::new(n, edges, ndarray::Array2::ones((n, 3)), NodeLabels::Single(vec![1; n])).unwrap()
}

proptest! {
    #[test]
    fn collection_views_are_fully_masked(
        train in prop::collection::vec(1usize..8, 1..5),
        val in prop::collection::vec(1usize..8, 1..5),
        test in prop::collection::vec(1usize..8, 1..5),
    ) {
        let collection = GraphCollection {
            train: train.iter().map(|&n| small_graph(n)).collect(),
            val: val.iter().map(|&n| small_graph(n)).collect(),
            test: test.iter().map(|&n| small_graph(n)).collect(),
        };
        let split = DataSplitter::new(SplitPolicy::Transductive)
            .split(RawDataset::Collection(collection))
            .unwrap();

        for (kind, sizes) in [(SplitMask::Train, &train), (SplitMask::Val, &val), (SplitMask::Test, &test)] {
            let view = split.view(kind);
            let total: usize = sizes.iter().sum();
            prop_assert_eq!(view.num_nodes(), total);
            let expected = vec![true; total];
            prop_assert_eq!(view.mask(kind).unwrap(), expected.as_slice());
            for other in SplitMask::ALL.into_iter().filter(|&o| o != kind) {
                prop_assert!(view.masked_nodes(other).is_empty());
            }
            prop_assert_eq!(view.component_sizes(), sizes.as_slice());
        }
    }
}

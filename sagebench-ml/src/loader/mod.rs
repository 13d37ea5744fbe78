//! Mini-batch loaders over the phase views.
//!
//! [`LoaderFactory::build`] turns a [`GraphSplit`] into one [`DataLoader`] per
//! phase. Each loader yields, per epoch, batches whose seed nodes are exactly
//! the nodes flagged by that phase's mask in its view.

pub mod batch;
pub mod sampler;
pub mod worker;

pub use batch::{Batch, Block};
pub use sampler::{Fanout, NeighborSampler};
pub use worker::WorkerPool;

use crate::data::graph::{Graph, SplitMask};
use crate::data::split::GraphSplit;
use crate::error::MlError;
use crate::training::reproducibility::{SeedManager, mix_seed};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use sagebench_core::{ConfigError, ResolvedConfig, SamplingStrategy};
use std::sync::Arc;
use worker::{BatchJob, Prefetch};

/// How a loader turns seed nodes into batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderStrategy {
    /// Seed nodes in groups of `batch_size`, neighbors sampled per layer.
    NeighborSampling { fanouts: Vec<Fanout> },
    /// Seed nodes in groups of `batch_size`, every neighbor aggregated.
    FullGraph,
    /// Whole graphs in groups of `batch_size`.
    GraphBatching,
}

impl LoaderStrategy {
    fn sampler(&self, num_layers: usize) -> NeighborSampler {
        match self {
            Self::NeighborSampling { fanouts } => NeighborSampler::new(fanouts.clone()),
            Self::FullGraph | Self::GraphBatching => NeighborSampler::full(num_layers),
        }
    }
}

/// Strategy of the training loader and of the two inference loaders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderPlan {
    pub train: LoaderStrategy,
    pub eval: LoaderStrategy,
}

impl LoaderPlan {
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, MlError> {
        let general = &config.general;
        match general.sampling_strategy {
            SamplingStrategy::Sage => {
                let num_neighbors =
                    config
                        .model
                        .num_neighbors
                        .as_ref()
                        .ok_or_else(|| ConfigError::MissingField {
                            field: format!("models.{}.num_neighbors", config.model_name),
                        })?;
                let fanouts: Vec<Fanout> = num_neighbors
                    .per_layer(config.model.num_layers)?
                    .into_iter()
                    .map(Fanout::from_config)
                    .collect();
                let train = LoaderStrategy::NeighborSampling { fanouts };
                let eval = if general.sample_when_predict {
                    train.clone()
                } else {
                    tracing::warn!(
                        "sample_when_predict is disabled: validation and test aggregate over \
                         all neighbors, unlike training."
                    );
                    LoaderStrategy::FullGraph
                };
                Ok(Self { train, eval })
            }
            SamplingStrategy::None => {
                tracing::warn!("No neighbor sampling: every layer aggregates over all neighbors.");
                Ok(Self {
                    train: LoaderStrategy::FullGraph,
                    eval: LoaderStrategy::FullGraph,
                })
            }
            SamplingStrategy::GraphBatching => Ok(Self {
                train: LoaderStrategy::GraphBatching,
                eval: LoaderStrategy::GraphBatching,
            }),
            SamplingStrategy::Saint => Err(MlError::loader(
                "GraphSAINT sampling is reserved and has no loader",
            )),
        }
    }
}

/// Per-loader knobs.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub batch_size: usize,
    pub num_layers: usize,
    pub shuffle: bool,
    pub seed: u64,
}

#[derive(Debug, Clone)]
enum Units {
    Nodes(Vec<usize>),
    /// Masked nodes of each constituent graph.
    Graphs(Vec<Vec<usize>>),
}

impl Units {
    fn len(&self) -> usize {
        match self {
            Self::Nodes(nodes) => nodes.len(),
            Self::Graphs(graphs) => graphs.len(),
        }
    }
}

/// Restartable, finite batch sequence over one phase view.
#[derive(Debug, Clone)]
pub struct DataLoader {
    phase: SplitMask,
    graph: Arc<Graph>,
    sampler: Arc<NeighborSampler>,
    units: Arc<Units>,
    options: LoaderOptions,
    workers: WorkerPool,
}

impl DataLoader {
    pub fn new(
        phase: SplitMask,
        graph: Arc<Graph>,
        strategy: &LoaderStrategy,
        options: LoaderOptions,
        workers: WorkerPool,
    ) -> Result<Self, MlError> {
        if options.batch_size == 0 {
            return Err(MlError::loader("batch_size must be at least 1"));
        }
        let units = match strategy {
            LoaderStrategy::GraphBatching => match graph.mask(phase) {
                Some(mask) => Units::Graphs(
                    graph
                        .component_ranges()
                        .into_iter()
                        .map(|range| range.filter(|&n| mask[n]).collect::<Vec<_>>())
                        .filter(|nodes| !nodes.is_empty())
                        .collect(),
                ),
                None => Units::Graphs(Vec::new()),
            },
            _ => Units::Nodes(graph.masked_nodes(phase)),
        };
        Ok(Self {
            phase,
            sampler: Arc::new(strategy.sampler(options.num_layers)),
            graph,
            units: Arc::new(units),
            options,
            workers,
        })
    }

    pub fn phase(&self) -> SplitMask {
        self.phase
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// Batches per epoch.
    pub fn len(&self) -> usize {
        self.units.len().div_ceil(self.options.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of supervision targets per epoch.
    pub fn num_targets(&self) -> usize {
        match self.units.as_ref() {
            Units::Nodes(nodes) => nodes.len(),
            Units::Graphs(graphs) => graphs.iter().map(Vec::len).sum(),
        }
    }

    /// Batches of one epoch. The same epoch number always yields the same
    /// batches.
    pub fn iter(&self, epoch: usize) -> Result<Batches, MlError> {
        let mut order: Vec<usize> = (0..self.units.len()).collect();
        if self.options.shuffle {
            let mut rng = StdRng::seed_from_u64(mix_seed(self.options.seed, &[epoch as u64]));
            order.shuffle(&mut rng);
        }
        let groups: Vec<Vec<usize>> = order
            .chunks(self.options.batch_size)
            .map(|chunk| match self.units.as_ref() {
                Units::Nodes(nodes) => chunk.iter().map(|&i| nodes[i]).collect(),
                Units::Graphs(graphs) => chunk.iter().flat_map(|&i| graphs[i].iter().copied()).collect(),
            })
            .collect();
        let job = EpochJob {
            graph: Arc::clone(&self.graph),
            sampler: Arc::clone(&self.sampler),
            groups,
            seed: mix_seed(self.options.seed, &[epoch as u64, 1]),
        };
        Ok(Batches(self.workers.run(job)?))
    }
}

struct EpochJob {
    graph: Arc<Graph>,
    sampler: Arc<NeighborSampler>,
    groups: Vec<Vec<usize>>,
    seed: u64,
}

impl BatchJob for EpochJob {
    fn len(&self) -> usize {
        self.groups.len()
    }

    fn build(&self, index: usize) -> Result<Batch, MlError> {
        let mut rng = StdRng::seed_from_u64(mix_seed(self.seed, &[index as u64]));
        self.sampler.sample(&self.graph, &self.groups[index], &mut rng)
    }
}

/// One epoch of batches, in plan order.
pub struct Batches(Prefetch<EpochJob>);

impl Iterator for Batches {
    type Item = Result<Batch, MlError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

impl ExactSizeIterator for Batches {}

/// The three phase loaders of a run.
#[derive(Debug, Clone)]
pub struct LoaderSet {
    pub train: DataLoader,
    pub val: DataLoader,
    pub test: DataLoader,
}

impl LoaderSet {
    pub fn get(&self, phase: SplitMask) -> &DataLoader {
        match phase {
            SplitMask::Train => &self.train,
            SplitMask::Val => &self.val,
            SplitMask::Test => &self.test,
        }
    }
}

/// Builds the phase loaders of a run.
pub struct LoaderFactory;

impl LoaderFactory {
    pub fn build(
        split: &GraphSplit,
        config: &ResolvedConfig,
        seeds: &mut SeedManager,
    ) -> Result<LoaderSet, MlError> {
        let plan = LoaderPlan::from_config(config)?;
        let general = &config.general;
        let workers = WorkerPool::new(general.num_workers, general.persistent_workers)?;

        let mut loader = |phase: SplitMask, strategy: &LoaderStrategy| -> Result<DataLoader, MlError> {
            let options = LoaderOptions {
                batch_size: config.hyperparameters.batch_size,
                num_layers: config.model.num_layers,
                shuffle: general.shuffle && phase == SplitMask::Train,
                seed: seeds.get_seed(&format!("loader.{phase}")),
            };
            DataLoader::new(
                phase,
                Arc::clone(split.view(phase)),
                strategy,
                options,
                workers.clone(),
            )
        };
        let set = LoaderSet {
            train: loader(SplitMask::Train, &plan.train)?,
            val: loader(SplitMask::Val, &plan.eval)?,
            test: loader(SplitMask::Test, &plan.eval)?,
        };

        tracing::info!(
            strategy = %general.sampling_strategy,
            train_batches = set.train.len(),
            val_batches = set.val.len(),
            test_batches = set.test.len(),
            num_workers = general.num_workers,
            persistent_workers = workers.is_persistent(),
            "Loaders ready"
        );
        Ok(set)
    }
}

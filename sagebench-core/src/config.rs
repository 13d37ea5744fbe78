//! Configuration system for Sagebench.
//!
//! Uses `figment` for layered loading: built-in defaults -> TOML file ->
//! environment (`SAGEBENCH_` prefix, `__` separates nesting). A loaded
//! [`ExperimentConfig`] is then resolved for one model/dataset pair into an
//! immutable [`ResolvedConfig`]. Resolution order, lowest to highest
//! precedence: general settings, hyperparameters, model fields, and the
//! model's `overwrite` table.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Keys owned by the `general` section.
const GENERAL_KEYS: &[&str] = &[
    "framework",
    "sampling_strategy",
    "sage_inductive_option",
    "soft_inductive_train_mask",
    "sample_when_predict",
    "seed",
    "device",
    "save_model",
    "criterion",
    "num_epochs",
    "patience",
    "num_workers",
    "persistent_workers",
    "normalize_features",
    "multilabel_threshold",
    "shuffle",
    "tmp_dir",
];

/// Keys owned by the `hyperparameters` section.
const HYPER_KEYS: &[&str] = &["batch_size", "lr", "weight_decay", "weighted_bce"];

// ---------------------------------------------------------------------------
// File layout
// ---------------------------------------------------------------------------

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub hyperparameters: Hyperparameters,
    /// Model collection. Entries are free-form tables; an optional
    /// `overwrite` sub-table carries the highest-precedence overrides.
    #[serde(default)]
    pub models: BTreeMap<String, Value>,
    /// Dataset collection.
    #[serde(default)]
    pub datasets: BTreeMap<String, DatasetSpec>,
    #[serde(default)]
    pub tracking: TrackingConfig,
}

/// General run settings, as written in the configuration file.
///
/// Enumerated options stay strings here; they are validated during
/// [`ExperimentConfig::resolve`] so errors can name the offending value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub framework: String,
    pub sampling_strategy: String,
    /// Inductive split flavour. Only consulted for inductive single-graph runs.
    #[serde(
        alias = "SAGE_inductive_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub sage_inductive_option: Option<String>,
    /// Mask that selects the training subgraph under the `soft` inductive option.
    pub soft_inductive_train_mask: String,
    /// Sample neighbors during validation and testing as well.
    pub sample_when_predict: bool,
    pub seed: u64,
    pub device: String,
    pub save_model: bool,
    pub criterion: String,
    pub num_epochs: usize,
    /// Defaults to `num_epochs` when unset.
    pub patience: Option<usize>,
    pub num_workers: usize,
    pub persistent_workers: bool,
    pub normalize_features: bool,
    pub multilabel_threshold: f32,
    pub shuffle: bool,
    /// Scratch directory for checkpoints and reports before upload.
    pub tmp_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            framework: "transductive".to_string(),
            sampling_strategy: "None".to_string(),
            sage_inductive_option: None,
            soft_inductive_train_mask: "train".to_string(),
            sample_when_predict: false,
            seed: 118_010_142,
            device: "cpu".to_string(),
            save_model: true,
            criterion: "loss".to_string(),
            num_epochs: 1000,
            patience: Some(100),
            num_workers: 2,
            persistent_workers: true,
            normalize_features: true,
            multilabel_threshold: 0.0,
            shuffle: false,
            tmp_dir: PathBuf::from("logs/tmp"),
        }
    }
}

/// Optimisation hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    pub batch_size: usize,
    pub lr: f64,
    /// L2 regularisation.
    pub weight_decay: f64,
    /// Per-class positive weighting for multi-label BCE.
    #[serde(alias = "weighted_BCE", skip_serializing_if = "Option::is_none")]
    pub weighted_bce: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            batch_size: 512,
            lr: 5e-3,
            weight_decay: 5e-4,
            weighted_bce: None,
            extra: BTreeMap::new(),
        }
    }
}

impl Hyperparameters {
    pub fn weighted_bce(&self) -> bool {
        self.weighted_bce.unwrap_or(false)
    }
}

/// Architecture-specific model fields after resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub base_model: String,
    pub num_layers: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_neighbors: Option<NumNeighbors>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Per-layer neighbor fan-out. A negative entry means "all neighbors".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumNeighbors {
    Uniform(i64),
    PerLayer(Vec<i64>),
}

impl NumNeighbors {
    /// Expand to one entry per model layer.
    pub fn per_layer(&self, num_layers: usize) -> Result<Vec<i64>, ConfigError> {
        match self {
            Self::Uniform(n) => Ok(vec![*n; num_layers]),
            Self::PerLayer(list) if list.len() == num_layers => Ok(list.clone()),
            Self::PerLayer(list) => Err(ConfigError::FanoutLength {
                expected: num_layers,
                got: list.len(),
            }),
        }
    }
}

/// Dataset catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub task_type: TaskType,
    pub num_node_features: usize,
    pub num_classes: usize,
}

/// Experiment-tracking sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Root directory of the local run store.
    pub root_dir: PathBuf,
    pub experiment: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("runs"),
            experiment: "Default".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Enumerated options
// ---------------------------------------------------------------------------

/// An enumerated configuration option parsed from its string form.
pub trait ConfigOption: Sized + Copy {
    /// Configuration key, used in error messages.
    const FIELD: &'static str;
    /// Accepted spellings, in declaration order.
    const OPTIONS: &'static [&'static str];

    fn from_option(value: &str) -> Option<Self>;

    fn parse(value: &str) -> Result<Self, ConfigError> {
        Self::from_option(value)
            .ok_or_else(|| ConfigError::invalid_option(Self::FIELD, value, Self::OPTIONS))
    }
}

/// Relationship between the graphs seen in training and in inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framework {
    Transductive,
    Inductive,
}

impl ConfigOption for Framework {
    const FIELD: &'static str = "framework";
    const OPTIONS: &'static [&'static str] = &["transductive", "inductive"];

    fn from_option(value: &str) -> Option<Self> {
        match value {
            "transductive" => Some(Self::Transductive),
            "inductive" => Some(Self::Inductive),
            _ => None,
        }
    }
}

/// Mini-batch construction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplingStrategy {
    /// GraphSAGE-style neighbor sampling.
    #[serde(rename = "SAGE")]
    Sage,
    /// GraphSAINT subgraph sampling. Accepted, not yet buildable.
    #[serde(rename = "SAINT")]
    Saint,
    /// Full neighborhood aggregation.
    #[serde(rename = "None")]
    None,
    /// Whole graphs as batch elements.
    GraphBatching,
}

impl ConfigOption for SamplingStrategy {
    const FIELD: &'static str = "sampling_strategy";
    const OPTIONS: &'static [&'static str] = &["SAGE", "SAINT", "None", "GraphBatching"];

    fn from_option(value: &str) -> Option<Self> {
        match value {
            "SAGE" => Some(Self::Sage),
            "SAINT" => Some(Self::Saint),
            "None" => Some(Self::None),
            "GraphBatching" => Some(Self::GraphBatching),
            _ => None,
        }
    }
}

/// Degree of separation between the training graph and the inference graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InductiveOption {
    Default,
    Strict,
    Soft,
}

impl ConfigOption for InductiveOption {
    const FIELD: &'static str = "SAGE_inductive_option";
    const OPTIONS: &'static [&'static str] = &["default", "strict", "soft"];

    fn from_option(value: &str) -> Option<Self> {
        match value {
            "default" => Some(Self::Default),
            "strict" => Some(Self::Strict),
            "soft" => Some(Self::Soft),
            _ => None,
        }
    }
}

/// Mask that carves the training subgraph out of the graph in the `soft`
/// inductive split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftTrainMask {
    Train,
    Val,
}

impl ConfigOption for SoftTrainMask {
    const FIELD: &'static str = "soft_inductive_train_mask";
    const OPTIONS: &'static [&'static str] = &["train", "val"];

    fn from_option(value: &str) -> Option<Self> {
        match value {
            "train" => Some(Self::Train),
            "val" => Some(Self::Val),
            _ => None,
        }
    }
}

/// Model-selection criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Loss,
    F1,
}

impl ConfigOption for Criterion {
    const FIELD: &'static str = "criterion";
    const OPTIONS: &'static [&'static str] = &["loss", "f1"];

    fn from_option(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "loss" => Some(Self::Loss),
            "f1" => Some(Self::F1),
            _ => None,
        }
    }
}

/// Node classification task flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    #[serde(rename = "single-label-NC")]
    SingleLabel,
    #[serde(rename = "multi-label-NC")]
    MultiLabel,
}

macro_rules! display_as_serde_name {
    ($($ty:ty),*) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match serde_json::to_value(self) {
                    Ok(Value::String(s)) => f.write_str(&s),
                    _ => write!(f, "{self:?}"),
                }
            }
        }
    )*};
}

display_as_serde_name!(
    Framework,
    SamplingStrategy,
    InductiveOption,
    SoftTrainMask,
    Criterion,
    TaskType
);

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Validated general settings.
#[derive(Debug, Clone, Serialize)]
pub struct GeneralSettings {
    pub framework: Framework,
    pub sampling_strategy: SamplingStrategy,
    /// `None` for transductive runs and graph-batching runs.
    pub inductive_option: Option<InductiveOption>,
    pub soft_train_mask: SoftTrainMask,
    pub sample_when_predict: bool,
    pub seed: u64,
    pub device: String,
    pub save_model: bool,
    pub criterion: Criterion,
    pub num_epochs: usize,
    /// Effective patience (`num_epochs` when unset).
    pub patience: usize,
    pub num_workers: usize,
    pub persistent_workers: bool,
    pub normalize_features: bool,
    pub multilabel_threshold: f32,
    pub shuffle: bool,
    pub tmp_dir: PathBuf,
}

/// Configuration for a single run, fully merged and validated.
///
/// Owns all of its data; nothing refers back into the [`ExperimentConfig`]
/// it was resolved from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub model_name: String,
    pub dataset_name: String,
    pub dataset: DatasetSpec,
    pub general: GeneralSettings,
    pub hyperparameters: Hyperparameters,
    pub model: ModelConfig,
    pub tracking: TrackingConfig,
    params: BTreeMap<String, Value>,
}

impl ResolvedConfig {
    /// Flat parameter mapping for the tracking sink.
    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }
}

struct Sections {
    general: Map<String, Value>,
    hyper: Map<String, Value>,
    model: Map<String, Value>,
}

impl Sections {
    /// Route a key to the section that owns it; unknown keys are model fields.
    fn assign(&mut self, key: &str, value: Value) {
        let lower = key.to_ascii_lowercase();
        if GENERAL_KEYS.contains(&lower.as_str()) {
            self.general.insert(lower, value);
        } else if HYPER_KEYS.contains(&lower.as_str()) {
            self.hyper.insert(lower, value);
        } else if self.hyper.contains_key(key) {
            self.hyper.insert(key.to_string(), value);
        } else {
            self.model.insert(key.to_string(), value);
        }
    }
}

fn into_object(value: Value, section: &str) -> Result<Map<String, Value>, ConfigError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ConfigError::invalid(format!("'{section}' must be a table"))),
    }
}

impl ExperimentConfig {
    /// Build from a TOML document layered over the built-in defaults.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml))
            .extract()
            .map_err(|e| ConfigError::Parse(Box::new(e)))
    }

    /// Resolve the configuration of one model on one dataset.
    pub fn resolve(&self, model_name: &str, dataset_name: &str) -> Result<ResolvedConfig, ConfigError> {
        let entry = self
            .models
            .get(model_name)
            .ok_or_else(|| ConfigError::UnknownModel {
                name: model_name.to_string(),
            })?;
        let dataset = self
            .datasets
            .get(dataset_name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownDataset {
                name: dataset_name.to_string(),
            })?;

        let mut entry = into_object(entry.clone(), &format!("models.{model_name}"))?;
        let overwrite = entry.remove("overwrite");

        let mut sections = Sections {
            general: into_object(serde_json::to_value(&self.general)?, "general")?,
            hyper: into_object(serde_json::to_value(&self.hyperparameters)?, "hyperparameters")?,
            model: Map::new(),
        };
        for (key, value) in entry {
            sections.assign(&key, value);
        }
        match overwrite {
            Some(Value::Object(overrides)) => {
                for (key, value) in overrides {
                    sections.assign(&key, value);
                }
            }
            Some(Value::Null) | None => {}
            Some(_) => {
                return Err(ConfigError::invalid(format!(
                    "'models.{model_name}.overwrite' must be a table"
                )));
            }
        }

        if !sections.model.contains_key("num_layers") {
            return Err(ConfigError::MissingField {
                field: format!("models.{model_name}.num_layers"),
            });
        }

        let general: GeneralConfig = serde_json::from_value(Value::Object(sections.general.clone()))?;
        let hyperparameters: Hyperparameters =
            serde_json::from_value(Value::Object(sections.hyper.clone()))?;
        let model: ModelConfig = serde_json::from_value(Value::Object(sections.model.clone()))?;

        let settings = validate_general(&general)?;
        if hyperparameters.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size must be at least 1"));
        }
        if model.num_layers == 0 {
            return Err(ConfigError::invalid("num_layers must be at least 1"));
        }

        let mut params: BTreeMap<String, Value> = BTreeMap::new();
        params.extend(sections.general);
        params.extend(sections.hyper);
        params.extend(sections.model);
        if settings.inductive_option.is_none() {
            params.remove("sage_inductive_option");
        }

        Ok(ResolvedConfig {
            model_name: model_name.to_string(),
            dataset_name: dataset_name.to_string(),
            dataset,
            general: settings,
            hyperparameters,
            model,
            tracking: self.tracking.clone(),
            params,
        })
    }
}

fn validate_general(general: &GeneralConfig) -> Result<GeneralSettings, ConfigError> {
    let framework = Framework::parse(&general.framework)?;
    let sampling_strategy = SamplingStrategy::parse(&general.sampling_strategy)?;
    let criterion = Criterion::parse(&general.criterion)?;
    let soft_train_mask = SoftTrainMask::parse(&general.soft_inductive_train_mask)?;

    // The inductive flavour only matters when a single graph gets split.
    let inductive_option = match (framework, sampling_strategy) {
        (Framework::Inductive, SamplingStrategy::Sage | SamplingStrategy::None) => Some(
            InductiveOption::parse(general.sage_inductive_option.as_deref().unwrap_or("strict"))?,
        ),
        _ => None,
    };

    if general.num_epochs == 0 {
        return Err(ConfigError::invalid("num_epochs must be at least 1"));
    }

    Ok(GeneralSettings {
        framework,
        sampling_strategy,
        inductive_option,
        soft_train_mask,
        sample_when_predict: general.sample_when_predict,
        seed: general.seed,
        device: general.device.clone(),
        save_model: general.save_model,
        criterion,
        num_epochs: general.num_epochs,
        patience: general.patience.unwrap_or(general.num_epochs),
        num_workers: general.num_workers,
        persistent_workers: general.persistent_workers,
        normalize_features: general.normalize_features,
        multilabel_threshold: general.multilabel_threshold,
        shuffle: general.shuffle,
        tmp_dir: general.tmp_dir.clone(),
    })
}

// ---------------------------------------------------------------------------
// Built-in catalog
// ---------------------------------------------------------------------------

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            hyperparameters: Hyperparameters::default(),
            models: default_models(),
            datasets: default_datasets(),
            tracking: TrackingConfig::default(),
        }
    }
}

fn default_models() -> BTreeMap<String, Value> {
    let mut models = BTreeMap::new();
    models.insert(
        "GraphSAGE-mean".to_string(),
        json!({
            "base_model": "GraphSAGE",
            "num_layers": 2,
            "num_neighbors": [25, 10],
            "hidden_node_channels": 256,
            "dropout": 0.0,
        }),
    );
    models.insert(
        "GraphSAGE-GCN-benchmark-trans".to_string(),
        json!({
            "base_model": "GraphSAGE",
            "overwrite": {
                "framework": "transductive",
                "sampling_strategy": "None",
                "lr": 5e-5,
                "weight_decay": 5e-4,
            },
            "num_layers": 2,
            "hidden_node_channels": 64,
            "dropout": 0.0,
            "aggr": "mean",
        }),
    );
    models.insert(
        "GAT-benchmark-trans".to_string(),
        json!({
            "base_model": "GAT",
            "overwrite": {
                "framework": "transductive",
                "sampling_strategy": "None",
                "lr": 5e-3,
                "weight_decay": 5e-4,
            },
            "hidden_node_channels_per_head": 8,
            "num_layers": 2,
            "heads": 8,
            "output_heads": 1,
            "dropout": 0.6,
        }),
    );
    models.insert(
        "GAT-SAGE-trans".to_string(),
        json!({
            "base_model": "GAT",
            "overwrite": {
                "framework": "transductive",
                "sampling_strategy": "SAGE",
                "batch_size": 999_999,
                "lr": 5e-3,
                "weight_decay": 5e-4,
            },
            "hidden_node_channels_per_head": 8,
            "num_layers": 2,
            "num_neighbors": [25, 10],
            "heads": 8,
            "output_heads": 1,
            "dropout": 0.0,
        }),
    );
    models.insert(
        "GAT-benchmark-in".to_string(),
        json!({
            "base_model": "GAT",
            "overwrite": {
                "framework": "inductive",
                "sampling_strategy": "GraphBatching",
                "batch_size": 2,
                "lr": 5e-3,
                "weight_decay": 0.0,
            },
            "num_layers": 3,
            "heads": [4, 4],
            "hidden_node_channels_per_head": [256, 256],
            "output_heads": 6,
            "dropout": 0.0,
            "skip_connection": true,
        }),
    );
    models
}

fn default_datasets() -> BTreeMap<String, DatasetSpec> {
    let single = |features, classes| DatasetSpec {
        task_type: TaskType::SingleLabel,
        num_node_features: features,
        num_classes: classes,
    };
    let mut datasets = BTreeMap::new();
    datasets.insert("Cora".to_string(), single(1433, 7));
    datasets.insert("CiteSeer".to_string(), single(3703, 6));
    datasets.insert("PubMed".to_string(), single(500, 3));
    datasets.insert("Reddit".to_string(), single(602, 41));
    datasets.insert("Reddit2".to_string(), single(602, 41));
    datasets.insert("Flickr".to_string(), single(500, 7));
    datasets.insert("Yelp".to_string(), single(300, 100));
    datasets.insert("AmazonProducts".to_string(), single(200, 107));
    datasets.insert(
        "PPI".to_string(),
        DatasetSpec {
            task_type: TaskType::MultiLabel,
            num_node_features: 50,
            num_classes: 121,
        },
    );
    datasets
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (`SAGEBENCH_GENERAL__NUM_EPOCHS`, ...)
/// 2. The TOML file at `path`, when given
/// 3. Built-in defaults
pub fn load_config(path: Option<&Path>) -> Result<ExperimentConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(ExperimentConfig::default()));

    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("SAGEBENCH_").split("__"));

    figment.extract().map_err(|e| ConfigError::Parse(Box::new(e)))
}

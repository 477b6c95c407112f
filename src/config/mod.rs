//! Layered configuration for the master.
//!
//! Configuration is loaded with precedence: Env vars > Config file > Defaults
//!
//! # Example config file (recmaster.toml)
//! ```toml
//! [database]
//! cache_size = 50
//! positive_feedback_types = ["star", "like"]
//! read_feedback_types = ["read"]
//!
//! [master]
//! num_jobs = 4
//!
//! [recommend]
//! item_neighbor_type = "auto"
//! enable_item_neighbor_index = true
//! fallback_recommend = ["item_based", "latest"]
//! ```

mod defaults;

pub use defaults::*;

use crate::cascade::Fallback;
use crate::error::{RecError, Result};
use crate::model::EntityType;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration for the recommendation master.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub master: MasterConfig,
    pub recommend: RecommendConfig,
}

impl Config {
    /// Load defaults, then the optional TOML file, then `RECMASTER_` env vars,
    /// and validate the result.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split(ENV_SPLIT));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a run meaningless. Called before any task starts.
    pub fn validate(&self) -> Result<()> {
        let ratio = self.database.test_ratio;
        if !(0.0..1.0).contains(&ratio) {
            return Err(RecError::Configuration(format!(
                "database.test_ratio must be in [0, 1), got {ratio}"
            )));
        }
        if self.master.num_jobs == 0 {
            return Err(RecError::Configuration(
                "master.num_jobs must be at least 1".to_string(),
            ));
        }
        for (name, recall) in [
            ("item_neighbor_index_recall", self.recommend.item_neighbor_index_recall),
            ("user_neighbor_index_recall", self.recommend.user_neighbor_index_recall),
        ] {
            if !(0.0..=1.0).contains(&recall) {
                return Err(RecError::Configuration(format!(
                    "recommend.{name} must be in [0, 1], got {recall}"
                )));
            }
        }
        self.recommend.fallbacks()?;
        Ok(())
    }
}

/// Data store and dataset construction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Length of persisted ranked lists
    pub cache_size: usize,
    /// Feedback types treated as positive
    pub positive_feedback_types: Vec<String>,
    /// Feedback types treated as read (negative for classification)
    pub read_feedback_types: Vec<String>,
    /// Holdout ratio for both dataset views
    pub test_ratio: f64,
    /// Seed for the deterministic split
    pub split_seed: u64,
    /// Streaming batch size
    pub batch_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            positive_feedback_types: default_positive_feedback_types(),
            read_feedback_types: default_read_feedback_types(),
            test_ratio: DEFAULT_TEST_RATIO,
            split_seed: DEFAULT_SPLIT_SEED,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Scheduling and membership settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Worker pool width
    pub num_jobs: usize,
    /// Heartbeat timeout in seconds
    pub node_ttl_secs: u64,
    /// Entities sampled per recall measurement
    pub recall_sample_size: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            num_jobs: DEFAULT_NUM_JOBS,
            node_ttl_secs: DEFAULT_NODE_TTL_SECS,
            recall_sample_size: DEFAULT_RECALL_SAMPLE_SIZE,
        }
    }
}

/// How neighbor similarity is chosen for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NeighborType {
    /// Jaccard over label sets
    Similar,
    /// Jaccard over positive counterparts
    Related,
    /// Per entity: `Similar` for freshly relabeled entities, `Related` otherwise
    #[default]
    Auto,
}

/// Baseline the label-modification time is compared against under `Auto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AutoBaseline {
    /// Start of the current run
    #[default]
    RunStart,
    /// Start of the previous neighbor run for the same entity type
    PreviousRun,
}

/// Order among items with equal popularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PopularTieBreak {
    /// Data-store stream order
    #[default]
    InsertionOrder,
    /// Ascending item id
    ItemId,
}

/// Neighbor engine and recommendation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendConfig {
    pub item_neighbor_type: NeighborType,
    pub user_neighbor_type: NeighborType,
    pub enable_item_neighbor_index: bool,
    pub item_neighbor_index_recall: f64,
    pub item_neighbor_index_fit_epoch: usize,
    pub enable_user_neighbor_index: bool,
    pub user_neighbor_index_recall: f64,
    pub user_neighbor_index_fit_epoch: usize,
    /// Recommenders tried after the offline list, in order
    pub fallback_recommend: Vec<String>,
    pub auto_baseline: AutoBaseline,
    /// Equal modification and baseline times select `Similar`
    pub auto_prefers_similar_on_tie: bool,
    pub popular_tie_break: PopularTieBreak,
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            item_neighbor_type: NeighborType::default(),
            user_neighbor_type: NeighborType::default(),
            enable_item_neighbor_index: false,
            item_neighbor_index_recall: DEFAULT_NEIGHBOR_INDEX_RECALL,
            item_neighbor_index_fit_epoch: DEFAULT_NEIGHBOR_INDEX_FIT_EPOCH,
            enable_user_neighbor_index: false,
            user_neighbor_index_recall: DEFAULT_NEIGHBOR_INDEX_RECALL,
            user_neighbor_index_fit_epoch: DEFAULT_NEIGHBOR_INDEX_FIT_EPOCH,
            fallback_recommend: default_fallback_recommend(),
            auto_baseline: AutoBaseline::default(),
            auto_prefers_similar_on_tie: false,
            popular_tie_break: PopularTieBreak::default(),
        }
    }
}

/// Per-entity-type view of the neighbor settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborSettings {
    pub neighbor_type: NeighborType,
    pub use_index: bool,
    pub recall_target: f64,
    pub fit_epochs: usize,
}

impl RecommendConfig {
    pub fn neighbor_settings(&self, entity_type: EntityType) -> NeighborSettings {
        match entity_type {
            EntityType::Item => NeighborSettings {
                neighbor_type: self.item_neighbor_type,
                use_index: self.enable_item_neighbor_index,
                recall_target: self.item_neighbor_index_recall,
                fit_epochs: self.item_neighbor_index_fit_epoch,
            },
            EntityType::User => NeighborSettings {
                neighbor_type: self.user_neighbor_type,
                use_index: self.enable_user_neighbor_index,
                recall_target: self.user_neighbor_index_recall,
                fit_epochs: self.user_neighbor_index_fit_epoch,
            },
        }
    }

    /// Resolve the fallback chain, failing on the first unknown name.
    pub fn fallbacks(&self) -> Result<Vec<Fallback>> {
        self.fallback_recommend
            .iter()
            .map(|name| name.parse::<Fallback>())
            .collect()
    }
}

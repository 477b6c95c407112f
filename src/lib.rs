//! # recmaster
//!
//! Maintenance and serving core of a recommendation platform.
//!
//! The [`Master`] loads users, items and feedback from a [`DataStore`] into an
//! indexed [`Dataset`], computes item and user neighbor lists on a bounded
//! worker pool, publishes popularity and recency rankings to a
//! [`CacheStore`], and serves recommendations through a fallback cascade.

pub mod cascade;
pub mod cluster;
pub mod config;
pub mod dataset;
pub mod error;
pub mod indexer;
pub mod model;
pub mod monitor;
pub mod neighbors;
pub mod orchestrator;
pub mod storage;
#[doc(hidden)]
pub mod test_support;

// Re-export main types for convenience
pub use cascade::{Fallback, Recommender};
pub use cluster::{ClusterRegistry, NodeCounts, NodeInfo, NodeList, NodeType};
pub use config::{Config, NeighborType};
pub use dataset::{Dataset, DatasetBuilder, DatasetStats};
pub use error::{RecError, Result};
pub use model::{Entity, EntityType, Feedback, FeedbackKey, Item, Scored, User};
pub use monitor::{TaskMonitor, TaskRecord, TaskStatus};
pub use neighbors::Similarity;
pub use orchestrator::{CancelToken, RunSummary};
pub use storage::{CacheStore, DataStore, MemoryCacheStore, MemoryDataStore};

use chrono::{DateTime, Duration, Utc};
use monitor::TASK_LOAD_DATASET;
use orchestrator::NeighborPlan;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

/// Stages of the load-dataset task: users, items, feedback, publish.
const LOAD_DATASET_STAGES: usize = 4;

/// Statistics exposed to the status layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub num_users: i64,
    pub num_items: i64,
    pub num_user_labels: i64,
    pub num_item_labels: i64,
    pub num_total_pos_feedbacks: i64,
    pub num_valid_pos_feedbacks: i64,
    pub num_valid_neg_feedbacks: i64,
    pub item_neighbor_index_recall: Option<f64>,
    pub user_neighbor_index_recall: Option<f64>,
    pub last_update_item_neighbors_time: Option<DateTime<Utc>>,
    pub last_update_user_neighbors_time: Option<DateTime<Utc>>,
    pub nodes: NodeCounts,
}

/// Main API of the recommendation master.
pub struct Master {
    data: Arc<dyn DataStore>,
    cache: Arc<dyn CacheStore>,
    config: Config,
    monitor: TaskMonitor,
    cluster: ClusterRegistry,
    dataset: RwLock<Option<Arc<Dataset>>>,
}

impl Master {
    /// Create a master over the given stores. The configuration is validated first.
    pub fn new(config: Config, data: Arc<dyn DataStore>, cache: Arc<dyn CacheStore>) -> Result<Self> {
        config.validate()?;
        let monitor = TaskMonitor::new();
        monitor.register(TASK_LOAD_DATASET);
        monitor.register(monitor::TASK_FIND_ITEM_NEIGHBORS);
        monitor.register(monitor::TASK_FIND_USER_NEIGHBORS);
        Ok(Self {
            data,
            cache,
            config,
            monitor,
            cluster: ClusterRegistry::new(),
            dataset: RwLock::new(None),
        })
    }

    /// A master over fresh in-memory stores.
    pub fn in_memory(config: Config) -> Result<Self> {
        Self::new(
            config,
            Arc::new(MemoryDataStore::new()),
            Arc::new(MemoryCacheStore::new()),
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replace the configuration; takes effect on the next run.
    pub fn set_config(&mut self, config: Config) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn data_store(&self) -> &Arc<dyn DataStore> {
        &self.data
    }

    pub fn cache_store(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    pub fn monitor(&self) -> &TaskMonitor {
        &self.monitor
    }

    /// The dataset built by the last successful load.
    pub fn dataset(&self) -> Option<Arc<Dataset>> {
        self.dataset.read().clone()
    }

    fn current_dataset(&self) -> Result<Arc<Dataset>> {
        self.dataset()
            .ok_or_else(|| RecError::not_found("dataset", "current"))
    }

    /// Stream everything from the data store, build a dataset, publish its
    /// rankings and statistics, and make it current.
    #[instrument(skip(self))]
    pub fn load_dataset(&self) -> Result<Arc<Dataset>> {
        self.monitor.start(TASK_LOAD_DATASET, LOAD_DATASET_STAGES);
        match self.load_dataset_inner() {
            Ok(dataset) => {
                self.monitor.complete(TASK_LOAD_DATASET);
                Ok(dataset)
            }
            Err(err) => {
                self.monitor.fail(TASK_LOAD_DATASET, &err);
                Err(err)
            }
        }
    }

    fn load_dataset_inner(&self) -> Result<Arc<Dataset>> {
        let database = &self.config.database;
        let batch_size = database.batch_size.max(1);

        let mut users = Vec::new();
        let mut cursor = String::new();
        loop {
            let (next, page) = self.data.get_users(&cursor, batch_size)?;
            users.extend(page);
            if next.is_empty() {
                break;
            }
            cursor = next;
        }
        self.monitor.increment(TASK_LOAD_DATASET, 1);

        let mut items = Vec::new();
        for batch in self.data.get_item_stream(batch_size)? {
            items.extend(batch?);
        }
        self.monitor.increment(TASK_LOAD_DATASET, 1);

        let types: Vec<String> = database
            .positive_feedback_types
            .iter()
            .chain(database.read_feedback_types.iter())
            .cloned()
            .collect();
        let mut feedback = Vec::new();
        for batch in self.data.get_feedback_stream(batch_size, &types)? {
            feedback.extend(batch?);
        }
        self.monitor.increment(TASK_LOAD_DATASET, 1);

        let dataset = DatasetBuilder::new(
            database.positive_feedback_types.clone(),
            database.read_feedback_types.clone(),
        )
        .test_ratio(database.test_ratio)
        .split_seed(database.split_seed)
        .popular_tie_break(self.config.recommend.popular_tie_break)
        .build(&users, &items, &feedback)?;

        orchestrator::publish_dataset(
            &dataset,
            self.cache.as_ref(),
            database.cache_size,
            self.cluster.counts(),
        )?;
        self.monitor.increment(TASK_LOAD_DATASET, 1);

        info!(
            users = dataset.stats.num_users,
            items = dataset.stats.num_items,
            positive = dataset.stats.num_valid_pos_feedbacks,
            "dataset loaded"
        );
        let dataset = Arc::new(dataset);
        *self.dataset.write() = Some(Arc::clone(&dataset));
        Ok(dataset)
    }

    fn plan(&self, entity_type: EntityType) -> NeighborPlan {
        NeighborPlan {
            entity_type,
            settings: self.config.recommend.neighbor_settings(entity_type),
            cache_size: self.config.database.cache_size,
            num_jobs: self.config.master.num_jobs,
            recall_sample_size: self.config.master.recall_sample_size,
            auto_baseline: self.config.recommend.auto_baseline,
            similar_on_tie: self.config.recommend.auto_prefers_similar_on_tie,
            seed: self.config.database.split_seed,
        }
    }

    /// Find neighbors for every entity of `entity_type` in the current dataset.
    pub fn run_find_neighbors(&self, entity_type: EntityType, cancel: &CancelToken) -> Result<RunSummary> {
        let dataset = self.current_dataset()?;
        orchestrator::run_find_neighbors(
            &dataset,
            self.cache.as_ref(),
            &self.monitor,
            &self.plan(entity_type),
            cancel,
        )
    }

    pub fn run_find_item_neighbors(&self) -> Result<RunSummary> {
        self.run_find_neighbors(EntityType::Item, &CancelToken::new())
    }

    pub fn run_find_user_neighbors(&self) -> Result<RunSummary> {
        self.run_find_neighbors(EntityType::User, &CancelToken::new())
    }

    fn store_context(&self) -> cascade::StoreContext {
        cascade::StoreContext {
            data: Arc::clone(&self.data),
            cache: Arc::clone(&self.cache),
            positive_types: self.config.database.positive_feedback_types.clone(),
            read_types: self.config.database.read_feedback_types.clone(),
        }
    }

    /// Recommend through the offline list and the configured fallback chain.
    pub fn recommend(&self, user_id: &str, category: &str, n: usize) -> Result<Vec<String>> {
        let fallbacks = self.config.recommend.fallbacks()?;
        self.recommend_chain(user_id, category, n, &cascade::chain(&fallbacks))
    }

    /// Recommend through an explicit list of recommender names.
    pub fn recommend_with(&self, user_id: &str, category: &str, n: usize, names: &[&str]) -> Result<Vec<String>> {
        let chain = names
            .iter()
            .map(|name| name.parse::<Fallback>())
            .collect::<Result<Vec<_>>>()?;
        self.recommend_chain(user_id, category, n, &chain)
    }

    fn recommend_chain(&self, user_id: &str, category: &str, n: usize, chain: &[Fallback]) -> Result<Vec<String>> {
        let recommenders = cascade::resolve(chain, &self.store_context());
        let refs: Vec<&dyn Recommender> = recommenders
            .iter()
            .map(|r| r as &dyn Recommender)
            .collect();
        cascade::recommend(user_id, category, n, &refs)
    }

    pub fn tasks(&self) -> Vec<TaskRecord> {
        self.monitor.list()
    }

    pub fn nodes(&self) -> NodeList {
        self.cluster.list()
    }

    /// Statistics from `global_meta`, with live node counts.
    pub fn stats(&self) -> Result<Stats> {
        let int = |id: &str| -> Result<i64> {
            match self.cache.get_int(storage::GLOBAL_META, id) {
                Err(err) if err.is_not_found() => Ok(0),
                other => other,
            }
        };
        let recall = |id: &str| -> Result<Option<f64>> {
            match self.cache.get_string(storage::GLOBAL_META, id) {
                Ok(raw) => raw
                    .parse::<f64>()
                    .map(Some)
                    .map_err(|err| RecError::Store(format!("{id}: {err}"))),
                Err(err) if err.is_not_found() => Ok(None),
                Err(err) => Err(err),
            }
        };
        let time = |id: &str| -> Result<Option<DateTime<Utc>>> {
            match self.cache.get_time(storage::GLOBAL_META, id) {
                Ok(time) => Ok(Some(time)),
                Err(err) if err.is_not_found() => Ok(None),
                Err(err) => Err(err),
            }
        };
        Ok(Stats {
            num_users: int(storage::NUM_USERS)?,
            num_items: int(storage::NUM_ITEMS)?,
            num_user_labels: int(storage::NUM_USER_LABELS)?,
            num_item_labels: int(storage::NUM_ITEM_LABELS)?,
            num_total_pos_feedbacks: int(storage::NUM_TOTAL_POS_FEEDBACKS)?,
            num_valid_pos_feedbacks: int(storage::NUM_VALID_POS_FEEDBACKS)?,
            num_valid_neg_feedbacks: int(storage::NUM_VALID_NEG_FEEDBACKS)?,
            item_neighbor_index_recall: recall(storage::ITEM_NEIGHBOR_INDEX_RECALL)?,
            user_neighbor_index_recall: recall(storage::USER_NEIGHBOR_INDEX_RECALL)?,
            last_update_item_neighbors_time: time(storage::LAST_UPDATE_ITEM_NEIGHBORS_TIME)?,
            last_update_user_neighbors_time: time(storage::LAST_UPDATE_USER_NEIGHBORS_TIME)?,
            nodes: self.cluster.counts(),
        })
    }

    /// A page of the global neighbors of one entity.
    pub fn neighbors(&self, entity_type: EntityType, id: &str, offset: usize, n: usize) -> Result<Vec<Scored>> {
        let kind = match entity_type {
            EntityType::Item => storage::ITEM_NEIGHBORS,
            EntityType::User => storage::USER_NEIGHBORS,
        };
        storage::cache::get_page(self.cache.as_ref(), &storage::key(kind, &[id]), offset, n)
    }

    /// A page of the neighbors of an item within one category.
    pub fn categorized_neighbors(&self, item_id: &str, category: &str, offset: usize, n: usize) -> Result<Vec<Scored>> {
        storage::cache::get_page(
            self.cache.as_ref(),
            &storage::key(storage::ITEM_NEIGHBORS, &[item_id, category]),
            offset,
            n,
        )
    }

    pub fn popular(&self, category: &str, offset: usize, n: usize) -> Result<Vec<Scored>> {
        storage::cache::get_page(
            self.cache.as_ref(),
            &storage::key(storage::POPULAR_ITEMS, &[category]),
            offset,
            n,
        )
    }

    pub fn latest(&self, category: &str, offset: usize, n: usize) -> Result<Vec<Scored>> {
        storage::cache::get_page(
            self.cache.as_ref(),
            &storage::key(storage::LATEST_ITEMS, &[category]),
            offset,
            n,
        )
    }

    pub fn categories(&self) -> Result<Vec<String>> {
        self.cache.get_set(storage::ITEM_CATEGORIES)
    }

    /// Create or refresh a node in the cluster registry.
    pub fn heartbeat(&self, node: NodeInfo) {
        self.cluster.register(node);
    }

    pub fn remove_node(&self, id: &str) -> Option<NodeInfo> {
        self.cluster.remove(id)
    }

    /// Drop nodes whose last heartbeat is older than `master.node_ttl_secs`.
    pub fn evict_expired_nodes(&self) -> Vec<String> {
        let ttl = Duration::seconds(self.config.master.node_ttl_secs as i64);
        self.cluster.evict_expired(Utc::now(), ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_require_a_dataset() {
        let master = Master::in_memory(Config::default()).unwrap();
        let err = master.run_find_item_neighbors().unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_invalid_config_is_rejected_up_front() {
        let mut config = Config::default();
        config.master.num_jobs = 0;
        assert!(matches!(
            Master::in_memory(config),
            Err(RecError::Configuration(_))
        ));
    }

    #[test]
    fn test_tasks_start_pending() {
        let master = Master::in_memory(Config::default()).unwrap();
        let tasks = master.tasks();
        assert_eq!(tasks.len(), 3);
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Pending));
    }

    #[test]
    fn test_stats_default_to_zero() {
        let master = Master::in_memory(Config::default()).unwrap();
        let stats = master.stats().unwrap();
        assert_eq!(stats, Stats::default());
    }

    #[test]
    fn test_node_membership() {
        let master = Master::in_memory(Config::default()).unwrap();
        master.heartbeat(NodeInfo::new("w", NodeType::Worker, "127.0.0.1:8087"));
        let mut stale = NodeInfo::new("s", NodeType::Server, "127.0.0.1:8088");
        stale.last_seen = Utc::now() - Duration::hours(1);
        master.heartbeat(stale);
        assert_eq!(master.nodes().servers.len(), 1);
        assert_eq!(master.evict_expired_nodes(), ["s"]);
        assert_eq!(master.stats().unwrap().nodes, NodeCounts { workers: 1, servers: 0 });
        assert!(master.remove_node("w").is_some());
    }
}

//! # Orchestrator
//!
//! Drives neighbor-finding runs and publishes dataset rankings to the cache.
//!
//! A run resolves the similarity of every entity up front, fits approximate
//! indexes when enabled, then hands index-ordered shards to a fixed-width
//! pool of worker threads over a bounded channel. Each worker writes the
//! global result of an entity plus one result per category it carries, and
//! bumps the task's done counter once per entity. The first error stops all
//! workers after their current entity; results already written stay.

use crate::cluster::NodeCounts;
use crate::config::{AutoBaseline, NeighborSettings, NeighborType};
use crate::dataset::Dataset;
use crate::error::{RecError, Result};
use crate::model::{EntityType, Scored};
use crate::monitor::{TaskMonitor, TASK_FIND_ITEM_NEIGHBORS, TASK_FIND_USER_NEIGHBORS};
use crate::neighbors::{resolve_similarity, FitOptions, NeighborEngine, Similarity};
use crate::storage::{self, CacheStore};
use chrono::{DateTime, Utc};
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Shards handed to each worker, on average.
const SHARDS_PER_WORKER: usize = 4;

/// Cooperative cancellation shared by every shard of a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Everything a neighbor run needs besides the dataset and the stores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborPlan {
    pub entity_type: EntityType,
    pub settings: NeighborSettings,
    pub cache_size: usize,
    pub num_jobs: usize,
    pub recall_sample_size: usize,
    pub auto_baseline: AutoBaseline,
    pub similar_on_tie: bool,
    pub seed: u64,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub processed: usize,
    /// Worst recall across fitted indexes; `None` when the run was exact.
    pub recall: Option<f64>,
    pub start_time: DateTime<Utc>,
}

pub fn task_name(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Item => TASK_FIND_ITEM_NEIGHBORS,
        EntityType::User => TASK_FIND_USER_NEIGHBORS,
    }
}

fn neighbors_kind(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Item => storage::ITEM_NEIGHBORS,
        EntityType::User => storage::USER_NEIGHBORS,
    }
}

fn last_update_key(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Item => storage::LAST_UPDATE_ITEM_NEIGHBORS_TIME,
        EntityType::User => storage::LAST_UPDATE_USER_NEIGHBORS_TIME,
    }
}

fn recall_key(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Item => storage::ITEM_NEIGHBOR_INDEX_RECALL,
        EntityType::User => storage::USER_NEIGHBOR_INDEX_RECALL,
    }
}

fn modify_table(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Item => storage::LAST_MODIFY_ITEM_TIME,
        EntityType::User => storage::LAST_MODIFY_USER_TIME,
    }
}

/// A cached time, treating an absent entry as `None`.
fn optional_time(cache: &dyn CacheStore, table: &str, id: &str) -> Result<Option<DateTime<Utc>>> {
    match cache.get_time(table, id) {
        Ok(time) => Ok(Some(time)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Split `0..n` into contiguous shards of roughly equal size.
fn shards(n: usize, num_jobs: usize) -> Vec<Range<u32>> {
    let count = (num_jobs * SHARDS_PER_WORKER).max(1);
    let size = n.div_ceil(count).max(1);
    (0..n)
        .step_by(size)
        .map(|start| start as u32..(start + size).min(n) as u32)
        .collect()
}

/// Run the neighbor-finding task for one entity type.
///
/// The task is marked Failed on the first error (including cancellation) and
/// the error is returned; cache entries written before the failure remain.
#[instrument(skip_all, fields(entity_type = %plan.entity_type, jobs = plan.num_jobs))]
pub fn run_find_neighbors(
    dataset: &Dataset,
    cache: &dyn CacheStore,
    monitor: &TaskMonitor,
    plan: &NeighborPlan,
    cancel: &CancelToken,
) -> Result<RunSummary> {
    let task = task_name(plan.entity_type);
    let start_time = Utc::now();
    let total = dataset.entities(plan.entity_type).len();
    monitor.start(task, total);

    match find_neighbors_inner(dataset, cache, monitor, plan, cancel, task, start_time) {
        Ok(summary) => {
            monitor.complete(task);
            info!(task, entities = summary.processed, recall = ?summary.recall, "neighbors stored");
            Ok(summary)
        }
        Err(err) => {
            monitor.fail(task, &err);
            Err(err)
        }
    }
}

fn find_neighbors_inner(
    dataset: &Dataset,
    cache: &dyn CacheStore,
    monitor: &TaskMonitor,
    plan: &NeighborPlan,
    cancel: &CancelToken,
    task: &str,
    start_time: DateTime<Utc>,
) -> Result<RunSummary> {
    if plan.num_jobs == 0 {
        return Err(RecError::Configuration("num_jobs must be at least 1".to_string()));
    }
    let mut engine = NeighborEngine::new(dataset, plan.entity_type, plan.cache_size);
    let set = engine.entities();

    let baseline = match plan.auto_baseline {
        AutoBaseline::RunStart => Some(start_time),
        AutoBaseline::PreviousRun => {
            optional_time(cache, storage::GLOBAL_META, last_update_key(plan.entity_type))?
        }
    };
    let table = modify_table(plan.entity_type);
    let mut modes = Vec::with_capacity(set.len());
    for index in 0..set.len() as u32 {
        let has_labels = !set.labels(index).is_empty();
        let modified = if plan.settings.neighbor_type == NeighborType::Auto && has_labels {
            optional_time(cache, table, set.id(index))?
        } else {
            None
        };
        modes.push(resolve_similarity(
            plan.settings.neighbor_type,
            has_labels,
            modified,
            baseline,
            plan.similar_on_tie,
        ));
    }

    let mut recall = None;
    if plan.settings.use_index {
        let options = FitOptions {
            recall_target: plan.settings.recall_target,
            fit_epochs: plan.settings.fit_epochs,
            sample_size: plan.recall_sample_size,
            seed: plan.seed,
        };
        for similarity in [Similarity::Related, Similarity::Similar] {
            if modes.contains(&similarity) {
                let achieved = engine.fit(similarity, options);
                if achieved < plan.settings.recall_target {
                    warn!(?similarity, recall = achieved, target = plan.settings.recall_target, "recall target not met");
                }
                recall = Some(recall.map_or(achieved, |r: f64| r.min(achieved)));
            }
        }
        if let Some(recall) = recall {
            cache.set_string(storage::GLOBAL_META, recall_key(plan.entity_type), &recall.to_string())?;
        }
    }

    let engine = &engine;
    let modes = &modes;
    let kind = neighbors_kind(plan.entity_type);
    let failure: Mutex<Option<RecError>> = Mutex::new(None);
    let abort = CancelToken::new();
    let (tx, rx) = bounded::<Range<u32>>(plan.num_jobs);

    std::thread::scope(|scope| {
        for worker in 0..plan.num_jobs {
            let rx = rx.clone();
            let failure = &failure;
            let abort = &abort;
            scope.spawn(move || {
                for shard in rx.iter() {
                    debug!(worker, start = shard.start, end = shard.end, "shard started");
                    for index in shard {
                        if abort.is_cancelled() {
                            return;
                        }
                        if cancel.is_cancelled() {
                            failure.lock().get_or_insert(RecError::Cancelled(task.to_string()));
                            abort.cancel();
                            return;
                        }
                        let stored = store_entity(engine, cache, kind, index, modes[index as usize]);
                        if let Err(err) = stored {
                            failure.lock().get_or_insert(err);
                            abort.cancel();
                            return;
                        }
                        monitor.increment(task, 1);
                    }
                }
            });
        }
        drop(rx);

        for shard in shards(set.len(), plan.num_jobs) {
            if abort.is_cancelled() || tx.send(shard).is_err() {
                break;
            }
        }
        drop(tx);
    });

    if let Some(err) = failure.into_inner() {
        return Err(err);
    }

    cache.set_time(storage::GLOBAL_META, last_update_key(plan.entity_type), start_time)?;
    Ok(RunSummary {
        processed: set.len(),
        recall,
        start_time,
    })
}

fn store_entity(
    engine: &NeighborEngine<'_>,
    cache: &dyn CacheStore,
    kind: &str,
    index: u32,
    similarity: Similarity,
) -> Result<()> {
    let set = engine.entities();
    let id = set.id(index);
    let neighbors = engine.find(index, similarity, "");
    cache.set_sorted(&storage::key(kind, &[id]), &neighbors)?;
    for category in set.categories(index) {
        let neighbors = engine.find(index, similarity, category);
        cache.set_sorted(&storage::key(kind, &[id, category]), &neighbors)?;
    }
    Ok(())
}

fn truncated(list: &[Scored], n: usize) -> &[Scored] {
    &list[..list.len().min(n)]
}

/// Write popular items, latest items, the category sets and the dataset
/// statistics to the cache.
#[instrument(skip_all, fields(cache_size = cache_size))]
pub fn publish_dataset(
    dataset: &Dataset,
    cache: &dyn CacheStore,
    cache_size: usize,
    nodes: NodeCounts,
) -> Result<()> {
    let now = Utc::now();
    for scope in dataset.popular_items.scopes() {
        let ranked = truncated(dataset.popular_items.get(scope), cache_size);
        cache.set_sorted(&storage::key(storage::POPULAR_ITEMS, &[scope]), ranked)?;
    }
    cache.set_time(storage::GLOBAL_META, storage::LAST_UPDATE_POPULAR_ITEMS_TIME, now)?;

    for scope in dataset.latest_items.scopes() {
        let ranked = truncated(dataset.latest_items.get(scope), cache_size);
        cache.set_sorted(&storage::key(storage::LATEST_ITEMS, &[scope]), ranked)?;
    }
    cache.set_time(storage::GLOBAL_META, storage::LAST_UPDATE_LATEST_ITEMS_TIME, now)?;

    let categories = dataset.categories.all();
    cache.set_set(storage::ITEM_CATEGORIES, &categories)?;
    for category in &categories {
        cache.set_set(
            &storage::key(storage::ITEM_CATEGORIES, &[category]),
            &dataset.categories.get(category),
        )?;
    }

    let stats = &dataset.stats;
    for (id, value) in [
        (storage::NUM_USERS, stats.num_users),
        (storage::NUM_ITEMS, stats.num_items),
        (storage::NUM_USER_LABELS, stats.num_user_labels),
        (storage::NUM_ITEM_LABELS, stats.num_item_labels),
        (storage::NUM_TOTAL_POS_FEEDBACKS, stats.num_total_pos_feedbacks),
        (storage::NUM_VALID_POS_FEEDBACKS, stats.num_valid_pos_feedbacks),
        (storage::NUM_VALID_NEG_FEEDBACKS, stats.num_valid_neg_feedbacks),
        (storage::NUM_WORKERS, nodes.workers),
        (storage::NUM_SERVERS, nodes.servers),
    ] {
        cache.set_int(storage::GLOBAL_META, id, value as i64)?;
    }
    debug!(categories = categories.len(), "dataset published");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shards_cover_range_in_order() {
        let ranges = shards(10, 2);
        let flat: Vec<u32> = ranges.iter().cloned().flatten().collect();
        assert_eq!(flat, (0..10).collect::<Vec<u32>>());
        assert!(ranges.len() <= 8);
        assert!(shards(0, 4).is_empty());
        assert_eq!(shards(3, 8).len(), 3);
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_truncated() {
        let list = vec![Scored::new("a", 2.0), Scored::new("b", 1.0)];
        assert_eq!(truncated(&list, 1).len(), 1);
        assert_eq!(truncated(&list, 5).len(), 2);
    }
}

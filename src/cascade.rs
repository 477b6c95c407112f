//! # Recommendation Cascade
//!
//! Chains recommenders in order until enough unique ids are collected.
//! Every recommender already filters to the requested category; the cascade
//! only deduplicates (first occurrence wins) and stops at `n`.

use crate::error::{RecError, Result};
use crate::model::Scored;
use crate::storage::{self, CacheStore, DataStore};
use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Source of candidate item ids for a user.
pub trait Recommender: Send + Sync {
    fn recommend(&self, user_id: &str, category: &str, n: usize) -> Result<Vec<String>>;
}

impl<F> Recommender for F
where
    F: Fn(&str, &str, usize) -> Result<Vec<String>> + Send + Sync,
{
    fn recommend(&self, user_id: &str, category: &str, n: usize) -> Result<Vec<String>> {
        self(user_id, category, n)
    }
}

/// Invoke `recommenders` in order, accumulating unique ids until `n` are
/// collected. Returning fewer than `n` is not an error.
///
/// Every recommender is asked for the full `n`, since some of its ids may
/// already have been collected from an earlier step.
pub fn recommend(
    user_id: &str,
    category: &str,
    n: usize,
    recommenders: &[&dyn Recommender],
) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut results = Vec::with_capacity(n);
    for (step, recommender) in recommenders.iter().enumerate() {
        if results.len() >= n {
            break;
        }
        let candidates = recommender.recommend(user_id, category, n)?;
        debug!(user = user_id, step, candidates = candidates.len(), "recommender consulted");
        for id in candidates {
            if results.len() >= n {
                break;
            }
            if seen.insert(id.clone()) {
                results.push(id);
            }
        }
    }
    Ok(results)
}

/// Named recommenders available to a fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fallback {
    Offline,
    Collaborative,
    ItemBased,
    UserBased,
    Latest,
    Popular,
}

impl Fallback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Fallback::Offline => "offline",
            Fallback::Collaborative => "collaborative",
            Fallback::ItemBased => "item_based",
            Fallback::UserBased => "user_based",
            Fallback::Latest => "latest",
            Fallback::Popular => "popular",
        }
    }
}

impl fmt::Display for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Fallback {
    type Err = RecError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "offline" => Ok(Fallback::Offline),
            "collaborative" => Ok(Fallback::Collaborative),
            "item_based" => Ok(Fallback::ItemBased),
            "user_based" => Ok(Fallback::UserBased),
            "latest" => Ok(Fallback::Latest),
            "popular" => Ok(Fallback::Popular),
            other => Err(RecError::Configuration(format!(
                "unknown fallback recommender `{other}`"
            ))),
        }
    }
}

/// Offline list first, then `fallbacks` in order, without repeats.
pub fn chain(fallbacks: &[Fallback]) -> Vec<Fallback> {
    let mut chain = vec![Fallback::Offline];
    for fallback in fallbacks {
        if !chain.contains(fallback) {
            chain.push(*fallback);
        }
    }
    chain
}

/// Shared context of the store-backed recommenders.
#[derive(Clone)]
pub struct StoreContext {
    pub data: Arc<dyn DataStore>,
    pub cache: Arc<dyn CacheStore>,
    pub positive_types: Vec<String>,
    pub read_types: Vec<String>,
}

impl StoreContext {
    /// Items the user already gave positive or read feedback on.
    fn seen_items(&self, user_id: &str) -> Result<HashSet<String>> {
        let types: Vec<String> = self
            .positive_types
            .iter()
            .chain(self.read_types.iter())
            .cloned()
            .collect();
        Ok(self
            .data
            .get_user_feedback(user_id, false, &types)?
            .into_iter()
            .map(|f| f.key.item_id)
            .collect())
    }

    fn positive_items(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(self
            .data
            .get_user_feedback(user_id, false, &self.positive_types)?
            .into_iter()
            .map(|f| f.key.item_id)
            .collect())
    }

    fn in_category(&self, item_id: &str, category: &str) -> Result<bool> {
        if category.is_empty() {
            return Ok(true);
        }
        match self.data.get_item(item_id) {
            Ok(item) => Ok(!item.is_hidden && item.categories.iter().any(|c| c == category)),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn sorted(&self, key: &str) -> Result<Vec<Scored>> {
        self.cache.get_sorted(key, 0, -1)
    }
}

/// A [`Fallback`] bound to the data and cache stores.
#[derive(Clone)]
pub struct StoreRecommender {
    kind: Fallback,
    context: StoreContext,
}

impl StoreRecommender {
    pub fn new(kind: Fallback, context: StoreContext) -> Self {
        Self { kind, context }
    }

    pub fn kind(&self) -> Fallback {
        self.kind
    }

    /// Ids of a cached list already scoped by key, minus seen items.
    fn from_list(&self, key: &str, seen: &HashSet<String>, n: usize) -> Result<Vec<String>> {
        Ok(self
            .context
            .sorted(key)?
            .into_iter()
            .filter(|s| !seen.contains(&s.id))
            .take(n)
            .map(|s| s.id)
            .collect())
    }

    fn item_based(&self, user_id: &str, category: &str, seen: &HashSet<String>, n: usize) -> Result<Vec<String>> {
        let mut scores: HashMap<String, f64> = HashMap::new();
        for item in self.context.positive_items(user_id)? {
            let mut neighbors = Vec::new();
            if !category.is_empty() {
                neighbors = self
                    .context
                    .sorted(&storage::key(storage::ITEM_NEIGHBORS, &[&item, category]))?;
            }
            if neighbors.is_empty() {
                neighbors = self
                    .context
                    .sorted(&storage::key(storage::ITEM_NEIGHBORS, &[&item]))?;
            }
            for neighbor in neighbors {
                if seen.contains(&neighbor.id) {
                    continue;
                }
                *scores.entry(neighbor.id).or_default() += neighbor.score;
            }
        }
        self.rank(scores, category, n)
    }

    fn user_based(&self, user_id: &str, category: &str, seen: &HashSet<String>, n: usize) -> Result<Vec<String>> {
        let mut scores: HashMap<String, f64> = HashMap::new();
        let neighbors = self
            .context
            .sorted(&storage::key(storage::USER_NEIGHBORS, &[user_id]))?;
        for neighbor in neighbors {
            for item in self.context.positive_items(&neighbor.id)? {
                if seen.contains(&item) {
                    continue;
                }
                *scores.entry(item).or_default() += neighbor.score;
            }
        }
        self.rank(scores, category, n)
    }

    /// Highest accumulated score first, ties by ascending id, filtered to `category`.
    fn rank(&self, scores: HashMap<String, f64>, category: &str, n: usize) -> Result<Vec<String>> {
        let mut ranked: Vec<(String, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let mut results = Vec::with_capacity(n.min(ranked.len()));
        for (id, _) in ranked {
            if results.len() >= n {
                break;
            }
            if self.context.in_category(&id, category)? {
                results.push(id);
            }
        }
        Ok(results)
    }
}

impl Recommender for StoreRecommender {
    fn recommend(&self, user_id: &str, category: &str, n: usize) -> Result<Vec<String>> {
        let seen = self.context.seen_items(user_id)?;
        match self.kind {
            Fallback::Offline => self.from_list(
                &storage::key(storage::OFFLINE_RECOMMEND, &[user_id, category]),
                &seen,
                n,
            ),
            Fallback::Collaborative => self.from_list(
                &storage::key(storage::COLLABORATIVE_RECOMMEND, &[user_id, category]),
                &seen,
                n,
            ),
            Fallback::Latest => {
                self.from_list(&storage::key(storage::LATEST_ITEMS, &[category]), &seen, n)
            }
            Fallback::Popular => {
                self.from_list(&storage::key(storage::POPULAR_ITEMS, &[category]), &seen, n)
            }
            Fallback::ItemBased => self.item_based(user_id, category, &seen, n),
            Fallback::UserBased => self.user_based(user_id, category, &seen, n),
        }
    }
}

/// Bind every fallback of a chain to the stores.
pub fn resolve(chain: &[Fallback], context: &StoreContext) -> Vec<StoreRecommender> {
    chain
        .iter()
        .map(|kind| StoreRecommender::new(*kind, context.clone()))
        .collect()
}

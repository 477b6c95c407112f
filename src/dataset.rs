//! # Dataset
//!
//! Converts raw users, items and feedback into an indexed, split dataset.
//! A dataset is immutable once built; a rebuild replaces it wholesale.
//!
//! Two views are produced:
//! - the matching view, positive feedback only, deduplicated per (user, item);
//! - the classification view, positive and read feedback labeled 1/0.
//!
//! Both are split into train and test subsets by hashing the (user, item)
//! pair, so the same input always lands in the same subset.

use crate::config::PopularTieBreak;
use crate::error::{RecError, Result};
use crate::indexer::Indexer;
use crate::model::{validate_category, validate_id, validate_label, Entity, EntityType, Feedback, Item, Scored, User};
use chrono::{DateTime, Utc};
use hashbrown::{HashMap, HashSet};
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use tracing::{debug, instrument};

/// Indexed view of one side of the interaction matrix.
#[derive(Debug, Clone, Default)]
pub struct EntitySet {
    entity_type: Option<EntityType>,
    ids: Indexer,
    label_index: Indexer,
    labels: Vec<Vec<u32>>,
    hidden: Vec<bool>,
    categories: Vec<Vec<String>>,
    timestamps: Vec<Option<DateTime<Utc>>>,
    /// Sorted counterpart indices with positive feedback.
    feedback: Vec<Vec<u32>>,
    category_members: HashMap<String, Vec<u32>>,
}

impl EntitySet {
    fn from_entities<E: Entity>(entity_type: EntityType, entities: &[E]) -> Result<Self> {
        let mut set = EntitySet {
            entity_type: Some(entity_type),
            ..Self::default()
        };
        for entity in entities {
            validate_id(entity_type.as_str(), entity.id())?;
            let index = set.ids.add_unique(entity.id()).ok_or_else(|| {
                RecError::Validation(format!("duplicate {} id '{}'", entity_type, entity.id()))
            })?;

            let mut labels = Vec::with_capacity(entity.labels().len());
            for label in entity.labels() {
                validate_label(entity.id(), label)?;
                labels.push(set.label_index.add(label));
            }
            labels.sort_unstable();
            labels.dedup();
            set.labels.push(labels);

            let mut categories: Vec<String> = Vec::new();
            for category in entity.categories() {
                validate_category(entity.id(), category)?;
                if !categories.contains(category) {
                    categories.push(category.clone());
                    set.category_members
                        .entry(category.clone())
                        .or_default()
                        .push(index);
                }
            }
            set.categories.push(categories);
            set.hidden.push(entity.is_hidden());
            set.timestamps.push(entity.timestamp());
            set.feedback.push(Vec::new());
        }
        Ok(set)
    }

    pub fn entity_type(&self) -> Option<EntityType> {
        self.entity_type
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn index(&self, id: &str) -> Option<u32> {
        self.ids.index(id)
    }

    /// Id of the entity at `index`. Panics on an out-of-range index, which
    /// only a foreign dataset could produce.
    pub fn id(&self, index: u32) -> &str {
        &self.ids.names()[index as usize]
    }

    pub fn ids(&self) -> &Indexer {
        &self.ids
    }

    pub fn label_index(&self) -> &Indexer {
        &self.label_index
    }

    /// Sorted, deduplicated label indices.
    pub fn labels(&self, index: u32) -> &[u32] {
        &self.labels[index as usize]
    }

    pub fn is_hidden(&self, index: u32) -> bool {
        self.hidden[index as usize]
    }

    pub fn categories(&self, index: u32) -> &[String] {
        &self.categories[index as usize]
    }

    pub fn timestamp(&self, index: u32) -> Option<DateTime<Utc>> {
        self.timestamps[index as usize]
    }

    /// Sorted indices of the counterpart entities with positive feedback.
    pub fn feedback(&self, index: u32) -> &[u32] {
        &self.feedback[index as usize]
    }

    /// Entities (hidden included) carrying `category`, in index order.
    pub fn category_members(&self, category: &str) -> &[u32] {
        self.category_members
            .get(category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Positive interactions, one per distinct (user, item) pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchingSet {
    pub user_indices: Vec<u32>,
    pub item_indices: Vec<u32>,
    user_count: usize,
    item_count: usize,
}

impl MatchingSet {
    pub fn count(&self) -> usize {
        self.user_indices.len()
    }

    /// Size of the user index space shared by both subsets.
    pub fn user_count(&self) -> usize {
        self.user_count
    }

    pub fn item_count(&self) -> usize {
        self.item_count
    }

    fn push(&mut self, user: u32, item: u32) {
        self.user_indices.push(user);
        self.item_indices.push(item);
    }
}

/// Labeled interactions for click-style models.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationSet {
    pub user_indices: Vec<u32>,
    pub item_indices: Vec<u32>,
    /// `true` for positive feedback, `false` for read-only feedback.
    pub targets: Vec<bool>,
    pub positive_count: usize,
    pub negative_count: usize,
    user_count: usize,
    item_count: usize,
    count_user_labels: usize,
    count_item_labels: usize,
}

impl ClassificationSet {
    pub fn count(&self) -> usize {
        self.targets.len()
    }

    pub fn user_count(&self) -> usize {
        self.user_count
    }

    pub fn item_count(&self) -> usize {
        self.item_count
    }

    pub fn count_user_labels(&self) -> usize {
        self.count_user_labels
    }

    pub fn count_item_labels(&self) -> usize {
        self.count_item_labels
    }

    fn push(&mut self, user: u32, item: u32, positive: bool) {
        self.user_indices.push(user);
        self.item_indices.push(item);
        self.targets.push(positive);
        if positive {
            self.positive_count += 1;
        } else {
            self.negative_count += 1;
        }
    }
}

/// Counters published to the `global_meta` cache table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetStats {
    pub num_users: usize,
    pub num_items: usize,
    pub num_user_labels: usize,
    pub num_item_labels: usize,
    /// Positive records read, valid or not.
    pub num_total_pos_feedbacks: usize,
    /// Distinct positive pairs whose user and item are both indexed.
    pub num_valid_pos_feedbacks: usize,
    /// Distinct read-only pairs whose user and item are both indexed.
    pub num_valid_neg_feedbacks: usize,
}

/// Ranked lists per category scope; `""` is the global scope.
#[derive(Debug, Clone, Default)]
pub struct ScopedRanking {
    scopes: HashMap<String, Vec<Scored>>,
}

impl ScopedRanking {
    /// Ranked list for `category` (`""` for global). Empty if unknown.
    pub fn get(&self, category: &str) -> &[Scored] {
        self.scopes.get(category).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Scopes present, global first, then categories ascending.
    pub fn scopes(&self) -> Vec<&str> {
        let mut scopes: Vec<&str> = self.scopes.keys().map(String::as_str).collect();
        scopes.sort_unstable();
        scopes
    }
}

/// Every distinct category observed on non-hidden items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryRegistry {
    categories: BTreeSet<String>,
}

impl CategoryRegistry {
    pub fn all(&self) -> Vec<String> {
        self.categories.iter().cloned().collect()
    }

    /// One-element set when `category` exists, empty otherwise.
    pub fn get(&self, category: &str) -> Vec<String> {
        self.categories
            .get(category)
            .map(|c| vec![c.clone()])
            .unwrap_or_default()
    }

    pub fn contains(&self, category: &str) -> bool {
        self.categories.contains(category)
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

/// Indexed, split dataset. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub users: EntitySet,
    pub items: EntitySet,
    pub matching_train: MatchingSet,
    pub matching_test: MatchingSet,
    pub classification_train: ClassificationSet,
    pub classification_test: ClassificationSet,
    pub popular_items: ScopedRanking,
    pub latest_items: ScopedRanking,
    pub categories: CategoryRegistry,
    pub stats: DatasetStats,
}

impl Dataset {
    pub fn entities(&self, entity_type: EntityType) -> &EntitySet {
        match entity_type {
            EntityType::User => &self.users,
            EntityType::Item => &self.items,
        }
    }
}

/// Builds a [`Dataset`] from raw records.
#[derive(Debug, Clone)]
pub struct DatasetBuilder {
    positive_types: Vec<String>,
    read_types: Vec<String>,
    test_ratio: f64,
    split_seed: u64,
    tie_break: PopularTieBreak,
}

impl DatasetBuilder {
    pub fn new(positive_types: Vec<String>, read_types: Vec<String>) -> Self {
        Self {
            positive_types,
            read_types,
            test_ratio: 0.0,
            split_seed: 0,
            tie_break: PopularTieBreak::default(),
        }
    }

    pub fn test_ratio(mut self, ratio: f64) -> Self {
        self.test_ratio = ratio;
        self
    }

    pub fn split_seed(mut self, seed: u64) -> Self {
        self.split_seed = seed;
        self
    }

    pub fn popular_tie_break(mut self, tie_break: PopularTieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    fn is_positive(&self, feedback_type: &str) -> bool {
        self.positive_types.iter().any(|t| t == feedback_type)
    }

    fn is_read(&self, feedback_type: &str) -> bool {
        self.read_types.iter().any(|t| t == feedback_type)
    }

    fn in_test(&self, user_id: &str, item_id: &str) -> bool {
        if self.test_ratio <= 0.0 {
            return false;
        }
        let mut hasher = FxHasher::default();
        self.split_seed.hash(&mut hasher);
        user_id.hash(&mut hasher);
        item_id.hash(&mut hasher);
        let unit = (hasher.finish() >> 11) as f64 / (1u64 << 53) as f64;
        unit < self.test_ratio
    }

    /// Index entities, dedupe and split feedback, and aggregate rankings.
    #[instrument(skip_all, fields(users = users.len(), items = items.len(), feedback = feedback.len()))]
    pub fn build(&self, users: &[User], items: &[Item], feedback: &[Feedback]) -> Result<Dataset> {
        if !(0.0..1.0).contains(&self.test_ratio) {
            return Err(RecError::Configuration(format!(
                "split ratio must be in [0, 1), got {}",
                self.test_ratio
            )));
        }

        let mut user_set = EntitySet::from_entities(EntityType::User, users)?;
        let mut item_set = EntitySet::from_entities(EntityType::Item, items)?;

        let mut stats = DatasetStats::default();
        let mut positive_pairs: Vec<(u32, u32)> = Vec::new();
        let mut positive_seen: HashSet<(u32, u32)> = HashSet::new();
        let mut read_pairs: Vec<(u32, u32)> = Vec::new();
        let mut read_seen: HashSet<(u32, u32)> = HashSet::new();

        for record in feedback {
            let positive = self.is_positive(record.feedback_type());
            if positive {
                stats.num_total_pos_feedbacks += 1;
            } else if !self.is_read(record.feedback_type()) {
                continue;
            }
            let (Some(user), Some(item)) = (
                user_set.index(record.user_id()),
                item_set.index(record.item_id()),
            ) else {
                continue;
            };
            if positive {
                if positive_seen.insert((user, item)) {
                    positive_pairs.push((user, item));
                }
            } else if read_seen.insert((user, item)) {
                read_pairs.push((user, item));
            }
        }
        // positive wins when a pair carries both kinds
        read_pairs.retain(|pair| !positive_seen.contains(pair));

        for &(user, item) in &positive_pairs {
            user_set.feedback[user as usize].push(item);
            item_set.feedback[item as usize].push(user);
        }
        for list in user_set.feedback.iter_mut().chain(item_set.feedback.iter_mut()) {
            list.sort_unstable();
        }

        let mut matching_train = MatchingSet::default();
        let mut matching_test = MatchingSet::default();
        for &(user, item) in &positive_pairs {
            if self.in_test(user_set.id(user), item_set.id(item)) {
                matching_test.push(user, item);
            } else {
                matching_train.push(user, item);
            }
        }
        for set in [&mut matching_train, &mut matching_test] {
            set.user_count = user_set.len();
            set.item_count = item_set.len();
        }

        // Classification rows need a visible item and a user with some positive signal,
        // so train plus test can hold fewer rows than the positive and read pairs.
        let eligible = |user: u32, item: u32| {
            !item_set.is_hidden(item) && !user_set.feedback(user).is_empty()
        };
        let mut classification_train = ClassificationSet::default();
        let mut classification_test = ClassificationSet::default();
        let labeled = positive_pairs
            .iter()
            .map(|&(u, i)| (u, i, true))
            .chain(read_pairs.iter().map(|&(u, i)| (u, i, false)));
        for (user, item, target) in labeled {
            if !eligible(user, item) {
                continue;
            }
            if self.in_test(user_set.id(user), item_set.id(item)) {
                classification_test.push(user, item, target);
            } else {
                classification_train.push(user, item, target);
            }
        }
        for set in [&mut classification_train, &mut classification_test] {
            set.user_count = user_set.len();
            set.item_count = item_set.len();
            set.count_user_labels = user_set.label_index.len();
            set.count_item_labels = item_set.label_index.len();
        }

        let popular_items = self.rank_popular(&item_set);
        let latest_items = rank_latest(&item_set);
        let categories = CategoryRegistry {
            categories: (0..item_set.len() as u32)
                .filter(|&i| !item_set.is_hidden(i))
                .flat_map(|i| item_set.categories(i).iter().cloned())
                .collect(),
        };

        stats.num_users = user_set.len();
        stats.num_items = item_set.len();
        stats.num_user_labels = user_set.label_index.len();
        stats.num_item_labels = item_set.label_index.len();
        stats.num_valid_pos_feedbacks = positive_pairs.len();
        stats.num_valid_neg_feedbacks = read_pairs.len();
        debug!(
            positive = stats.num_valid_pos_feedbacks,
            negative = stats.num_valid_neg_feedbacks,
            test = matching_test.count(),
            "dataset built"
        );

        Ok(Dataset {
            users: user_set,
            items: item_set,
            matching_train,
            matching_test,
            classification_train,
            classification_test,
            popular_items,
            latest_items,
            categories,
            stats,
        })
    }

    fn rank_popular(&self, items: &EntitySet) -> ScopedRanking {
        let mut order: Vec<u32> = (0..items.len() as u32)
            .filter(|&i| !items.is_hidden(i) && !items.feedback(i).is_empty())
            .collect();
        if self.tie_break == PopularTieBreak::ItemId {
            order.sort_by(|&a, &b| items.id(a).cmp(items.id(b)));
        }
        // stable: equal counts keep the tie-break order established above
        order.sort_by(|&a, &b| items.feedback(b).len().cmp(&items.feedback(a).len()));
        scoped(items, &order, |i| items.feedback(i).len() as f64)
    }
}

fn rank_latest(items: &EntitySet) -> ScopedRanking {
    let mut order: Vec<u32> = (0..items.len() as u32)
        .filter(|&i| !items.is_hidden(i) && items.timestamp(i).is_some())
        .collect();
    order.sort_by(|&a, &b| items.timestamp(b).cmp(&items.timestamp(a)));
    scoped(items, &order, |i| {
        items.timestamp(i).map(|t| t.timestamp() as f64).unwrap_or_default()
    })
}

fn scoped(items: &EntitySet, order: &[u32], score: impl Fn(u32) -> f64) -> ScopedRanking {
    let mut scopes: HashMap<String, Vec<Scored>> = HashMap::new();
    for &item in order {
        let entry = Scored::new(items.id(item), score(item));
        for category in items.categories(item) {
            scopes.entry(category.clone()).or_default().push(entry.clone());
        }
        scopes.entry(String::new()).or_default().push(entry);
    }
    ScopedRanking { scopes }
}

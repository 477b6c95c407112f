use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::Config;
use crate::dataset::{Dataset, DatasetBuilder};
use crate::error::{RecError, Result};
use crate::model::{Feedback, Item, Scored, User};
use crate::storage::{CacheStore, DataStore, MemoryCacheStore, MemoryDataStore};
use crate::Master;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Feedback type used by the neighbor scenarios.
pub const SCENARIO_FEEDBACK: &str = "FeedbackType";

/// Raw records ready to be inserted into a data store.
#[derive(Debug, Clone, Default)]
pub struct Fixture {
    pub users: Vec<User>,
    pub items: Vec<Item>,
    pub feedback: Vec<Feedback>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Label sets shared by both neighbor scenarios, indexed by entity number.
fn scenario_labels(i: usize) -> Vec<String> {
    match i {
        0 => strings(&["a", "b", "c", "d"]),
        1 => strings(&["b", "c", "d"]),
        2 => strings(&["b", "c"]),
        3 => strings(&["c"]),
        8 | 10 => strings(&["a", "b", "c", "d", "e"]),
        _ => Vec::new(),
    }
}

/// Eleven items; item `i < 10` is liked by users `0..=i`, item 10 is hidden
/// and liked by everyone. Items 0, 2, 3, 4, 6 and 8 are in category `*`.
pub fn neighbor_items() -> Fixture {
    let items = (0..=10)
        .map(|i| {
            let mut item = Item::new(i.to_string(), scenario_labels(i));
            if matches!(i, 0 | 2 | 3 | 4 | 6 | 8) {
                item = item.with_categories(strings(&["*"]));
            }
            if i == 10 {
                item = item.hidden();
            }
            item
        })
        .collect();
    let users = (0..=10).map(|u| User::new(u.to_string(), Vec::new())).collect();
    let mut feedback = Vec::new();
    for i in 0..10 {
        for u in 0..=i {
            feedback.push(Feedback::new(SCENARIO_FEEDBACK, u.to_string(), i.to_string(), epoch()));
        }
    }
    for u in 0..=10 {
        feedback.push(Feedback::new(SCENARIO_FEEDBACK, u.to_string(), "10", epoch()));
    }
    Fixture { users, items, feedback }
}

/// Eleven users; user `i < 10` likes items `0..=i`, user 10 has no feedback
/// and no labels.
pub fn neighbor_users() -> Fixture {
    let users = (0..=10)
        .map(|u| {
            let labels = if u == 10 { Vec::new() } else { scenario_labels(u) };
            User::new(u.to_string(), labels)
        })
        .collect();
    let items = (0..10).map(|i| Item::new(i.to_string(), Vec::new())).collect();
    let mut feedback = Vec::new();
    for u in 0..10 {
        for i in 0..=u {
            feedback.push(Feedback::new(SCENARIO_FEEDBACK, u.to_string(), i.to_string(), epoch()));
        }
    }
    Fixture { users, items, feedback }
}

/// Ten items split into `even` and `odd` categories, five users with
/// feedback and one without.
///
/// - user `u` stars item `i` when `i >= 2u` and reads it otherwise
///   (user 0 also reads item 0, which is dropped as it is starred);
/// - item `i` was published `i` hours after the epoch, except item 5;
/// - item 9 is hidden.
pub fn load_dataset_fixture() -> Fixture {
    let items = (0..10)
        .map(|i| {
            let category = if i % 2 == 0 { "even" } else { "odd" };
            let mut item = Item::new(i.to_string(), vec![format!("t{}", i % 3)])
                .with_categories(strings(&[category]));
            if i != 5 {
                item = item.with_timestamp(epoch() + Duration::hours(i as i64));
            }
            if i == 9 {
                item = item.hidden();
            }
            item
        })
        .collect();
    let users = (0..6)
        .map(|u| User::new(u.to_string(), vec![format!("l{}", u % 2)]))
        .collect();
    let mut feedback = Vec::new();
    for u in 0..5 {
        for i in 0..10 {
            let kind = if i >= 2 * u { "star" } else { "read" };
            feedback.push(Feedback::new(kind, u.to_string(), i.to_string(), epoch()));
        }
    }
    feedback.push(Feedback::new("read", "0", "0", epoch()));
    Fixture { users, items, feedback }
}

/// Small cache, four workers, a single positive type and no read type.
pub fn scenario_config() -> Config {
    let mut config = Config::default();
    config.database.cache_size = 3;
    config.database.positive_feedback_types = vec![SCENARIO_FEEDBACK.to_string()];
    config.database.read_feedback_types = Vec::new();
    config.master.num_jobs = 4;
    config
}

/// Insert a fixture into a data store.
pub fn seed_data_store(store: &dyn DataStore, fixture: &Fixture) -> Result<()> {
    store.batch_insert_users(&fixture.users)?;
    store.batch_insert_items(&fixture.items)?;
    store.batch_insert_feedback(&fixture.feedback, false, false, true)
}

/// A fresh in-memory data store holding `fixture`.
pub fn memory_data_store(fixture: &Fixture) -> Result<MemoryDataStore> {
    let store = MemoryDataStore::new();
    seed_data_store(&store, fixture)?;
    Ok(store)
}

/// A master over `fixture` and the given cache store.
pub fn master_with_cache(fixture: &Fixture, config: Config, cache: Arc<dyn CacheStore>) -> Result<Master> {
    Master::new(config, Arc::new(memory_data_store(fixture)?), cache)
}

/// A master over `fixture` and an empty in-memory cache.
pub fn master_with(fixture: &Fixture, config: Config) -> Result<Master> {
    master_with_cache(fixture, config, Arc::new(MemoryCacheStore::new()))
}

/// Build a dataset straight from a fixture.
pub fn build_dataset(fixture: &Fixture, positive: &[&str], read: &[&str]) -> Result<Dataset> {
    DatasetBuilder::new(strings(positive), strings(read)).build(
        &fixture.users,
        &fixture.items,
        &fixture.feedback,
    )
}

/// Random users, items and `like` feedback with a few labels and categories.
pub fn random_fixture(seed: u64, users: usize, items: usize, feedback_per_user: usize) -> Fixture {
    let mut rng = StdRng::seed_from_u64(seed);
    let labels = ["red", "green", "blue", "small", "large", "new", "used"];
    let categories = ["books", "music", "games"];

    let users_out = (0..users)
        .map(|u| {
            let count = rng.random_range(0..3);
            let picked = (0..count)
                .map(|_| labels[rng.random_range(0..labels.len())].to_string())
                .collect();
            User::new(format!("u{u:05}"), picked)
        })
        .collect();
    let items_out = (0..items)
        .map(|i| {
            let count = rng.random_range(0..4);
            let picked = (0..count)
                .map(|_| labels[rng.random_range(0..labels.len())].to_string())
                .collect();
            let category = categories[rng.random_range(0..categories.len())];
            let mut item = Item::new(format!("i{i:05}"), picked)
                .with_categories(vec![category.to_string()])
                .with_timestamp(epoch() + Duration::minutes(rng.random_range(0..100_000)));
            if rng.random_bool(0.05) {
                item = item.hidden();
            }
            item
        })
        .collect();
    let mut feedback = Vec::with_capacity(users * feedback_per_user);
    for u in 0..users {
        for _ in 0..feedback_per_user {
            // skew toward low item ids so popularity is uneven
            let a = rng.random_range(0..items.max(1));
            let b = rng.random_range(0..items.max(1));
            let item = a.min(b);
            feedback.push(Feedback::new("like", format!("u{u:05}"), format!("i{item:05}"), epoch()));
        }
    }
    Fixture {
        users: users_out,
        items: items_out,
        feedback,
    }
}

/// A random dataset with `like` as the only positive type.
pub fn random_dataset(seed: u64, users: usize, items: usize, feedback_per_user: usize) -> Result<Dataset> {
    build_dataset(&random_fixture(seed, users, items, feedback_per_user), &["like"], &[])
}

/// Cache store whose sorted-set writes start failing after a fixed number
/// of successful writes.
#[derive(Debug, Default)]
pub struct FailingCacheStore {
    inner: MemoryCacheStore,
    remaining: AtomicUsize,
}

impl FailingCacheStore {
    pub fn new(successful_writes: usize) -> Self {
        Self {
            inner: MemoryCacheStore::new(),
            remaining: AtomicUsize::new(successful_writes),
        }
    }

    pub fn inner(&self) -> &MemoryCacheStore {
        &self.inner
    }
}

impl CacheStore for FailingCacheStore {
    fn get_string(&self, table: &str, id: &str) -> Result<String> {
        self.inner.get_string(table, id)
    }

    fn set_string(&self, table: &str, id: &str, value: &str) -> Result<()> {
        self.inner.set_string(table, id, value)
    }

    fn get_sorted(&self, key: &str, begin: usize, end: isize) -> Result<Vec<Scored>> {
        self.inner.get_sorted(key, begin, end)
    }

    fn set_sorted(&self, key: &str, scores: &[Scored]) -> Result<()> {
        let granted = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match granted {
            Ok(_) => self.inner.set_sorted(key, scores),
            Err(_) => Err(RecError::Store(format!("write to '{key}' refused"))),
        }
    }

    fn get_set(&self, key: &str) -> Result<Vec<String>> {
        self.inner.get_set(key)
    }

    fn set_set(&self, key: &str, members: &[String]) -> Result<()> {
        self.inner.set_set(key, members)
    }
}

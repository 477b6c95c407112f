//! Cache store contract and a concurrent in-memory implementation.

use crate::error::{RecError, Result};
use crate::model::Scored;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeSet;

/// Scalar, sorted-set and set storage used to publish computed results.
///
/// Sorted-set writes replace the whole key and are atomic per key; no cross-key
/// transaction is offered.
pub trait CacheStore: Send + Sync {
    fn get_string(&self, table: &str, id: &str) -> Result<String>;
    fn set_string(&self, table: &str, id: &str, value: &str) -> Result<()>;

    fn get_int(&self, table: &str, id: &str) -> Result<i64> {
        let raw = self.get_string(table, id)?;
        raw.parse::<i64>()
            .map_err(|err| RecError::Store(format!("{table}/{id}: {err}")))
    }

    fn set_int(&self, table: &str, id: &str, value: i64) -> Result<()> {
        self.set_string(table, id, &value.to_string())
    }

    fn get_time(&self, table: &str, id: &str) -> Result<DateTime<Utc>> {
        let raw = self.get_string(table, id)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|time| time.with_timezone(&Utc))
            .map_err(|err| RecError::Store(format!("{table}/{id}: {err}")))
    }

    fn set_time(&self, table: &str, id: &str, value: DateTime<Utc>) -> Result<()> {
        self.set_string(table, id, &value.to_rfc3339())
    }

    /// Entries ranked `begin..=end` (descending score). A negative `end`
    /// counts from the tail, so `-1` reads to the last entry. Missing keys are empty.
    fn get_sorted(&self, key: &str, begin: usize, end: isize) -> Result<Vec<Scored>>;

    /// Replace the sorted set stored under `key`.
    fn set_sorted(&self, key: &str, scores: &[Scored]) -> Result<()>;

    /// Members in ascending order. Missing keys are empty.
    fn get_set(&self, key: &str) -> Result<Vec<String>>;

    /// Replace the set stored under `key`.
    fn set_set(&self, key: &str, members: &[String]) -> Result<()>;
}

/// Reads a page of a sorted set through `offset`/`n` paging.
pub fn get_page(cache: &dyn CacheStore, key: &str, offset: usize, n: usize) -> Result<Vec<Scored>> {
    match super::page(offset, n) {
        Some((begin, end)) => cache.get_sorted(key, begin, end),
        None => Ok(Vec::new()),
    }
}

/// In-memory cache store. Every key lives in its own shard of a `DashMap`,
/// which gives per-key atomic replacement.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    scalars: DashMap<(String, String), String>,
    sorted: DashMap<String, Vec<Scored>>,
    sets: DashMap<String, BTreeSet<String>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sorted-set keys currently stored.
    pub fn sorted_len(&self) -> usize {
        self.sorted.len()
    }

    /// Every sorted-set key, ascending.
    pub fn sorted_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.sorted.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

impl CacheStore for MemoryCacheStore {
    fn get_string(&self, table: &str, id: &str) -> Result<String> {
        self.scalars
            .get(&(table.to_string(), id.to_string()))
            .map(|value| value.clone())
            .ok_or_else(|| RecError::not_found("cache entry", format!("{table}/{id}")))
    }

    fn set_string(&self, table: &str, id: &str, value: &str) -> Result<()> {
        self.scalars
            .insert((table.to_string(), id.to_string()), value.to_string());
        Ok(())
    }

    fn get_sorted(&self, key: &str, begin: usize, end: isize) -> Result<Vec<Scored>> {
        let Some(entries) = self.sorted.get(key) else {
            return Ok(Vec::new());
        };
        let len = entries.len() as isize;
        let end = if end < 0 { len + end } else { end.min(len - 1) };
        if end < 0 || begin > end as usize {
            return Ok(Vec::new());
        }
        Ok(entries[begin..=end as usize].to_vec())
    }

    fn set_sorted(&self, key: &str, scores: &[Scored]) -> Result<()> {
        let mut entries = scores.to_vec();
        // stable: equal scores keep the order they were written in
        entries.sort_by(|a, b| b.score.total_cmp(&a.score));
        self.sorted.insert(key.to_string(), entries);
        Ok(())
    }

    fn get_set(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .get(key)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn set_set(&self, key: &str, members: &[String]) -> Result<()> {
        self.sets
            .insert(key.to_string(), members.iter().cloned().collect());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::remove_scores;

    fn scored(pairs: &[(&str, f64)]) -> Vec<Scored> {
        pairs.iter().map(|(id, s)| Scored::new(*id, *s)).collect()
    }

    #[test]
    fn test_scalars() {
        let cache = MemoryCacheStore::new();
        assert!(cache.get_int("meta", "n").unwrap_err().is_not_found());
        cache.set_int("meta", "n", 42).unwrap();
        assert_eq!(cache.get_int("meta", "n").unwrap(), 42);

        let now = Utc::now();
        cache.set_time("meta", "t", now).unwrap();
        let back = cache.get_time("meta", "t").unwrap();
        assert_eq!(back.timestamp_micros(), now.timestamp_micros());

        cache.set_string("meta", "s", "0.75").unwrap();
        assert_eq!(cache.get_string("meta", "s").unwrap(), "0.75");
    }

    #[test]
    fn test_sorted_ranges_are_inclusive() {
        let cache = MemoryCacheStore::new();
        cache
            .set_sorted("k", &scored(&[("a", 1.0), ("b", 3.0), ("c", 2.0), ("d", 0.5)]))
            .unwrap();
        assert_eq!(remove_scores(&cache.get_sorted("k", 0, 2).unwrap()), ["b", "c", "a"]);
        assert_eq!(remove_scores(&cache.get_sorted("k", 1, 1).unwrap()), ["c"]);
        assert_eq!(cache.get_sorted("k", 0, -1).unwrap().len(), 4);
        assert_eq!(cache.get_sorted("k", 2, 100).unwrap().len(), 2);
        assert!(cache.get_sorted("k", 10, 20).unwrap().is_empty());
        assert!(cache.get_sorted("missing", 0, -1).unwrap().is_empty());
    }

    #[test]
    fn test_sorted_ties_keep_write_order() {
        let cache = MemoryCacheStore::new();
        cache
            .set_sorted("k", &scored(&[("z", 1.0), ("a", 1.0), ("m", 2.0)]))
            .unwrap();
        assert_eq!(remove_scores(&cache.get_sorted("k", 0, -1).unwrap()), ["m", "z", "a"]);
    }

    #[test]
    fn test_set_sorted_replaces() {
        let cache = MemoryCacheStore::new();
        cache.set_sorted("k", &scored(&[("a", 1.0), ("b", 2.0)])).unwrap();
        cache.set_sorted("k", &scored(&[("c", 1.0)])).unwrap();
        assert_eq!(remove_scores(&cache.get_sorted("k", 0, -1).unwrap()), ["c"]);
    }

    #[test]
    fn test_sets_are_sorted() {
        let cache = MemoryCacheStore::new();
        cache
            .set_set("cats", &["2".to_string(), "0".to_string(), "1".to_string()])
            .unwrap();
        assert_eq!(cache.get_set("cats").unwrap(), ["0", "1", "2"]);
        assert!(cache.get_set("none").unwrap().is_empty());
    }

    #[test]
    fn test_get_page() {
        let cache = MemoryCacheStore::new();
        cache
            .set_sorted("k", &scored(&[("a", 3.0), ("b", 2.0), ("c", 1.0)]))
            .unwrap();
        assert_eq!(remove_scores(&get_page(&cache, "k", 1, 5).unwrap()), ["b", "c"]);
        assert!(get_page(&cache, "k", 0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_get_page_with_unbounded_count() {
        let cache = MemoryCacheStore::new();
        cache
            .set_sorted("k", &scored(&[("a", 3.0), ("b", 2.0), ("c", 1.0)]))
            .unwrap();
        assert_eq!(remove_scores(&get_page(&cache, "k", 0, usize::MAX).unwrap()), ["a", "b", "c"]);
        assert_eq!(remove_scores(&get_page(&cache, "k", 2, usize::MAX).unwrap()), ["c"]);
        assert!(get_page(&cache, "k", usize::MAX, usize::MAX).unwrap().is_empty());
    }
}

//! # Indexer
//!
//! Bijection between opaque string ids and dense `u32` indices. Similarity
//! computation addresses entities and labels by index; indices are handed out
//! in order of first appearance and never reused for the lifetime of a dataset.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Indexer {
    to_index: HashMap<String, u32>,
    names: Vec<String>,
}

impl Indexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `name`, returning its existing index or the next free one.
    pub fn add(&mut self, name: &str) -> u32 {
        if let Some(&index) = self.to_index.get(name) {
            return index;
        }
        let index = self.names.len() as u32;
        self.to_index.insert(name.to_string(), index);
        self.names.push(name.to_string());
        index
    }

    /// Intern `name` only if it is new. Returns `None` when it was already present.
    pub fn add_unique(&mut self, name: &str) -> Option<u32> {
        if self.to_index.contains_key(name) {
            return None;
        }
        Some(self.add(name))
    }

    pub fn index(&self, name: &str) -> Option<u32> {
        self.to_index.get(name).copied()
    }

    pub fn name(&self, index: u32) -> Option<&str> {
        self.names.get(index as usize).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.to_index.contains_key(name)
    }

    /// Size of the index space.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Names in index order.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

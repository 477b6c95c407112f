//! Data store contract and an in-memory implementation.

use crate::error::{RecError, Result};
use crate::model::{validate_category, validate_id, validate_label, Feedback, FeedbackKey, Item, User};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Batched stream of records read from a data store.
pub type Stream<'a, T> = Box<dyn Iterator<Item = Result<Vec<T>>> + Send + 'a>;

/// Source of truth for users, items and feedback.
pub trait DataStore: Send + Sync {
    fn get_user(&self, user_id: &str) -> Result<User>;
    fn get_item(&self, item_id: &str) -> Result<Item>;

    /// Up to `n` users after `cursor`, plus the cursor for the next page
    /// (empty once the listing is exhausted).
    fn get_users(&self, cursor: &str, n: usize) -> Result<(String, Vec<User>)>;

    fn get_item_stream(&self, batch_size: usize) -> Result<Stream<'_, Item>>;

    /// Feedback of the given types (all types when empty), in batches.
    fn get_feedback_stream(
        &self,
        batch_size: usize,
        feedback_types: &[String],
    ) -> Result<Stream<'_, Feedback>>;

    /// Feedback left by one user. With `include_negative == false` only the
    /// listed types are returned; otherwise every type is. An empty type list
    /// never filters.
    fn get_user_feedback(
        &self,
        user_id: &str,
        include_negative: bool,
        feedback_types: &[String],
    ) -> Result<Vec<Feedback>>;

    fn batch_insert_users(&self, users: &[User]) -> Result<()>;
    fn batch_insert_items(&self, items: &[Item]) -> Result<()>;
    fn batch_insert_feedback(
        &self,
        feedback: &[Feedback],
        auto_create_user: bool,
        auto_create_item: bool,
        update_on_conflict: bool,
    ) -> Result<()>;
}

fn validate_user(user: &User) -> Result<()> {
    validate_id("user", &user.user_id)?;
    for label in &user.labels {
        validate_label(&user.user_id, label)?;
    }
    Ok(())
}

fn validate_item(item: &Item) -> Result<()> {
    validate_id("item", &item.item_id)?;
    for label in &item.labels {
        validate_label(&item.item_id, label)?;
    }
    for category in &item.categories {
        validate_category(&item.item_id, category)?;
    }
    Ok(())
}

fn batched<T: Send + 'static>(records: Vec<T>, batch_size: usize) -> Stream<'static, T> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(records.len() / batch_size + 1);
    let mut current = Vec::with_capacity(batch_size);
    for record in records {
        current.push(record);
        if current.len() == batch_size {
            batches.push(std::mem::replace(&mut current, Vec::with_capacity(batch_size)));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    Box::new(batches.into_iter().map(Ok))
}

/// In-memory data store. Listings iterate in ascending id order.
#[derive(Debug, Default)]
pub struct MemoryDataStore {
    users: RwLock<BTreeMap<String, User>>,
    items: RwLock<BTreeMap<String, Item>>,
    feedback: RwLock<BTreeMap<FeedbackKey, Feedback>>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_count(&self) -> usize {
        self.users.read().len()
    }

    pub fn item_count(&self) -> usize {
        self.items.read().len()
    }

    pub fn feedback_count(&self) -> usize {
        self.feedback.read().len()
    }
}

impl DataStore for MemoryDataStore {
    fn get_user(&self, user_id: &str) -> Result<User> {
        self.users
            .read()
            .get(user_id)
            .cloned()
            .ok_or_else(|| RecError::not_found("user", user_id))
    }

    fn get_item(&self, item_id: &str) -> Result<Item> {
        self.items
            .read()
            .get(item_id)
            .cloned()
            .ok_or_else(|| RecError::not_found("item", item_id))
    }

    fn get_users(&self, cursor: &str, n: usize) -> Result<(String, Vec<User>)> {
        let users = self.users.read();
        let page: Vec<User> = if cursor.is_empty() {
            users.values().take(n).cloned().collect()
        } else {
            users
                .range::<str, _>((std::ops::Bound::Excluded(cursor), std::ops::Bound::Unbounded))
                .map(|(_, user)| user.clone())
                .take(n)
                .collect()
        };
        let next = match page.last() {
            Some(last) if page.len() == n => {
                let has_more = users
                    .range::<str, _>((
                        std::ops::Bound::Excluded(last.user_id.as_str()),
                        std::ops::Bound::Unbounded,
                    ))
                    .next()
                    .is_some();
                if has_more {
                    last.user_id.clone()
                } else {
                    String::new()
                }
            }
            _ => String::new(),
        };
        Ok((next, page))
    }

    fn get_item_stream(&self, batch_size: usize) -> Result<Stream<'_, Item>> {
        let items: Vec<Item> = self.items.read().values().cloned().collect();
        Ok(batched(items, batch_size))
    }

    fn get_feedback_stream(
        &self,
        batch_size: usize,
        feedback_types: &[String],
    ) -> Result<Stream<'_, Feedback>> {
        let feedback: Vec<Feedback> = self
            .feedback
            .read()
            .values()
            .filter(|f| feedback_types.is_empty() || feedback_types.iter().any(|t| t == f.feedback_type()))
            .cloned()
            .collect();
        Ok(batched(feedback, batch_size))
    }

    fn get_user_feedback(
        &self,
        user_id: &str,
        include_negative: bool,
        feedback_types: &[String],
    ) -> Result<Vec<Feedback>> {
        let feedback = self.feedback.read();
        let mut matched: Vec<Feedback> = feedback
            .values()
            .filter(|f| f.user_id() == user_id)
            .filter(|f| {
                include_negative
                    || feedback_types.is_empty()
                    || feedback_types.iter().any(|t| t == f.feedback_type())
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(matched)
    }

    fn batch_insert_users(&self, users: &[User]) -> Result<()> {
        for user in users {
            validate_user(user)?;
        }
        let mut stored = self.users.write();
        for user in users {
            stored.insert(user.user_id.clone(), user.clone());
        }
        Ok(())
    }

    fn batch_insert_items(&self, items: &[Item]) -> Result<()> {
        for item in items {
            validate_item(item)?;
        }
        let mut stored = self.items.write();
        for item in items {
            stored.insert(item.item_id.clone(), item.clone());
        }
        Ok(())
    }

    fn batch_insert_feedback(
        &self,
        feedback: &[Feedback],
        auto_create_user: bool,
        auto_create_item: bool,
        update_on_conflict: bool,
    ) -> Result<()> {
        for record in feedback {
            validate_id("user", record.user_id())?;
            validate_id("item", record.item_id())?;
            if record.feedback_type().is_empty() {
                return Err(RecError::Validation(format!(
                    "empty feedback type for ({}, {})",
                    record.user_id(),
                    record.item_id()
                )));
            }
        }

        let mut users = self.users.write();
        let mut items = self.items.write();
        let mut stored = self.feedback.write();
        for record in feedback {
            if !users.contains_key(record.user_id()) {
                if !auto_create_user {
                    continue;
                }
                users.insert(
                    record.user_id().to_string(),
                    User::new(record.user_id(), Vec::new()),
                );
            }
            if !items.contains_key(record.item_id()) {
                if !auto_create_item {
                    continue;
                }
                items.insert(
                    record.item_id().to_string(),
                    Item::new(record.item_id(), Vec::new()),
                );
            }
            if stored.contains_key(&record.key) && !update_on_conflict {
                continue;
            }
            stored.insert(record.key.clone(), record.clone());
        }
        Ok(())
    }
}

//! # Data Model
//!
//! Core entities (users, items), feedback records and scored results.
//! Users and items share the [`Entity`] capability set so neighbor and ranking
//! logic is written once.

use crate::error::{RecError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator used when composing cache keys; forbidden inside ids and categories.
pub const KEY_SEPARATOR: char = ':';

/// Which side of the interaction matrix an entity lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityType {
    User,
    Item,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::User => "user",
            EntityType::Item => "item",
        }
    }

    /// The entity type on the other side of a feedback record.
    pub fn counterpart(&self) -> EntityType {
        match self {
            EntityType::User => EntityType::Item,
            EntityType::Item => EntityType::User,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared capability set of users and items.
pub trait Entity {
    fn id(&self) -> &str;
    fn labels(&self) -> &[String];
    fn timestamp(&self) -> Option<DateTime<Utc>>;

    /// Categories the entity belongs to. Users have none.
    fn categories(&self) -> &[String] {
        &[]
    }

    /// Hidden entities are never offered as candidates. Users are never hidden.
    fn is_hidden(&self) -> bool {
        false
    }
}

/// A user of the platform.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub comment: String,
}

impl User {
    pub fn new(user_id: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            labels,
            comment: String::new(),
        }
    }
}

impl Entity for User {
    fn id(&self) -> &str {
        &self.user_id
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// A recommendable item.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Item {
    pub item_id: String,
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub comment: String,
}

impl Item {
    pub fn new(item_id: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            item_id: item_id.into(),
            labels,
            ..Self::default()
        }
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.is_hidden = true;
        self
    }
}

impl Entity for Item {
    fn id(&self) -> &str {
        &self.item_id
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    fn categories(&self) -> &[String] {
        &self.categories
    }

    fn is_hidden(&self) -> bool {
        self.is_hidden
    }
}

/// Composite key of a feedback record. Inserts are idempotent by this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedbackKey {
    pub feedback_type: String,
    pub user_id: String,
    pub item_id: String,
}

impl FeedbackKey {
    pub fn new(
        feedback_type: impl Into<String>,
        user_id: impl Into<String>,
        item_id: impl Into<String>,
    ) -> Self {
        Self {
            feedback_type: feedback_type.into(),
            user_id: user_id.into(),
            item_id: item_id.into(),
        }
    }
}

/// One interaction between a user and an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    #[serde(flatten)]
    pub key: FeedbackKey,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl Feedback {
    pub fn new(
        feedback_type: impl Into<String>,
        user_id: impl Into<String>,
        item_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            key: FeedbackKey::new(feedback_type, user_id, item_id),
            timestamp,
            comment: None,
        }
    }

    pub fn feedback_type(&self) -> &str {
        &self.key.feedback_type
    }

    pub fn user_id(&self) -> &str {
        &self.key.user_id
    }

    pub fn item_id(&self) -> &str {
        &self.key.item_id
    }
}

/// An id with a score, as stored in sorted sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scored {
    pub id: String,
    pub score: f64,
}

impl Scored {
    pub fn new(id: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

/// Strip scores from a ranked list.
pub fn remove_scores(scored: &[Scored]) -> Vec<String> {
    scored.iter().map(|s| s.id.clone()).collect()
}

/// Reject empty ids and ids that would corrupt composed cache keys.
pub fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(RecError::Validation(format!("{kind} id must not be empty")));
    }
    if id.contains(KEY_SEPARATOR) {
        return Err(RecError::Validation(format!(
            "{kind} id '{id}' must not contain '{KEY_SEPARATOR}'"
        )));
    }
    Ok(())
}

/// Labels may be any non-blank string.
pub fn validate_label(owner: &str, label: &str) -> Result<()> {
    if label.trim().is_empty() {
        return Err(RecError::Validation(format!(
            "blank label on '{owner}'"
        )));
    }
    Ok(())
}

/// Categories end up inside cache keys, so they follow the id rules.
pub fn validate_category(owner: &str, category: &str) -> Result<()> {
    if category.is_empty() || category.contains(KEY_SEPARATOR) {
        return Err(RecError::Validation(format!(
            "invalid category '{category}' on '{owner}'"
        )));
    }
    Ok(())
}

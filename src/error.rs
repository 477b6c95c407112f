//! # Errors
//!
//! Error taxonomy shared by the dataset builder, the neighbor engine, the
//! orchestrator and the recommendation cascade.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RecError>;

/// Every failure the core can surface to its callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecError {
    /// Malformed or duplicate id, label or category. Raised before storage is touched.
    #[error("validation error: {0}")]
    Validation(String),
    /// Entity absent from the data store or dataset.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    /// I/O failure against the data store or cache store.
    #[error("store error: {0}")]
    Store(String),
    /// Unknown recommender, invalid ratio, zero-width pool and similar setup mistakes.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A run was aborted through its cancel token.
    #[error("task '{0}' was cancelled")]
    Cancelled(String),
}

impl RecError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<figment::Error> for RecError {
    fn from(err: figment::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for RecError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(err.to_string())
    }
}

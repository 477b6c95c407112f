//! Default constants for recmaster configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// Database Defaults
// =============================================================================

/// Length of every persisted ranked list (neighbors, popular, latest).
pub const DEFAULT_CACHE_SIZE: usize = 100;

/// Feedback types counted as implicit positive preference.
pub fn default_positive_feedback_types() -> Vec<String> {
    vec!["star".to_string(), "like".to_string()]
}

/// Feedback types counted as read-but-not-liked.
pub fn default_read_feedback_types() -> Vec<String> {
    vec!["read".to_string()]
}

/// Share of feedback held out for evaluation.
pub const DEFAULT_TEST_RATIO: f64 = 0.2;

/// Seed mixed into the train/test split hash.
pub const DEFAULT_SPLIT_SEED: u64 = 0;

/// Batch size used when streaming from the data store.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

// =============================================================================
// Master Defaults
// =============================================================================

/// Width of the neighbor worker pool. Never auto-detected.
pub const DEFAULT_NUM_JOBS: usize = 1;

/// Seconds without a heartbeat before a node is evicted.
pub const DEFAULT_NODE_TTL_SECS: u64 = 30;

/// Number of entities sampled when measuring approximate index recall.
pub const DEFAULT_RECALL_SAMPLE_SIZE: usize = 1000;

// =============================================================================
// Recommend Defaults
// =============================================================================

/// Recall the approximate neighbor index must reach before it is accepted.
pub const DEFAULT_NEIGHBOR_INDEX_RECALL: f64 = 0.8;

/// Retraining budget for the approximate neighbor index.
pub const DEFAULT_NEIGHBOR_INDEX_FIT_EPOCH: usize = 3;

/// Recommenders consulted after the offline list runs dry.
pub fn default_fallback_recommend() -> Vec<String> {
    vec!["latest".to_string()]
}

// =============================================================================
// Environment
// =============================================================================

/// Prefix of environment overrides, e.g. `RECMASTER_MASTER__NUM_JOBS=8`.
pub const ENV_PREFIX: &str = "RECMASTER_";

/// Separator between nested keys in environment overrides.
pub const ENV_SPLIT: &str = "__";

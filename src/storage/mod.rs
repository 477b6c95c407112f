//! # Storage Contracts
//!
//! The data store holds users, items and feedback; the cache store holds
//! scalars, sorted sets and sets produced by the master. Concrete engines live
//! outside this crate; the in-memory implementations here back tests, benches
//! and the runner binary.

pub mod cache;
pub mod data;

pub use cache::{CacheStore, MemoryCacheStore};
pub use data::{DataStore, MemoryDataStore};

/// Sorted set of item neighbors: `item_neighbors:<item>[:<category>]`.
pub const ITEM_NEIGHBORS: &str = "item_neighbors";
/// Sorted set of user neighbors: `user_neighbors:<user>`.
pub const USER_NEIGHBORS: &str = "user_neighbors";
/// Sorted set of popular items: `popular_items[:<category>]`.
pub const POPULAR_ITEMS: &str = "popular_items";
/// Sorted set of latest items: `latest_items[:<category>]`.
pub const LATEST_ITEMS: &str = "latest_items";
/// Set of categories: `item_categories` or `item_categories:<category>`.
pub const ITEM_CATEGORIES: &str = "item_categories";
/// Sorted set of offline recommendations: `offline_recommend:<user>[:<category>]`.
pub const OFFLINE_RECOMMEND: &str = "offline_recommend";
/// Sorted set of collaborative recommendations: `collaborative_recommend:<user>[:<category>]`.
pub const COLLABORATIVE_RECOMMEND: &str = "collaborative_recommend";

/// Scalar table holding per-item label modification times.
pub const LAST_MODIFY_ITEM_TIME: &str = "last_modify_item_time";
/// Scalar table holding per-user label modification times.
pub const LAST_MODIFY_USER_TIME: &str = "last_modify_user_time";

/// Scalar table for global statistics and timestamps.
pub const GLOBAL_META: &str = "global_meta";
pub const NUM_USERS: &str = "num_users";
pub const NUM_ITEMS: &str = "num_items";
pub const NUM_USER_LABELS: &str = "num_user_labels";
pub const NUM_ITEM_LABELS: &str = "num_item_labels";
pub const NUM_TOTAL_POS_FEEDBACKS: &str = "num_total_pos_feedbacks";
pub const NUM_VALID_POS_FEEDBACKS: &str = "num_valid_pos_feedbacks";
pub const NUM_VALID_NEG_FEEDBACKS: &str = "num_valid_neg_feedbacks";
pub const NUM_WORKERS: &str = "num_workers";
pub const NUM_SERVERS: &str = "num_servers";
pub const LAST_UPDATE_POPULAR_ITEMS_TIME: &str = "last_update_popular_items_time";
pub const LAST_UPDATE_LATEST_ITEMS_TIME: &str = "last_update_latest_items_time";
pub const LAST_UPDATE_ITEM_NEIGHBORS_TIME: &str = "last_update_item_neighbors_time";
pub const LAST_UPDATE_USER_NEIGHBORS_TIME: &str = "last_update_user_neighbors_time";
pub const ITEM_NEIGHBOR_INDEX_RECALL: &str = "item_neighbor_index_recall";
pub const USER_NEIGHBOR_INDEX_RECALL: &str = "user_neighbor_index_recall";

/// Compose a cache key from a kind and its non-empty parts.
///
/// `key("item_neighbors", &["9", ""])` is `item_neighbors:9`, and
/// `key("popular_items", &["books"])` is `popular_items:books`.
pub fn key(kind: &str, parts: &[&str]) -> String {
    let mut composed = String::from(kind);
    for part in parts.iter().filter(|part| !part.is_empty()) {
        composed.push(crate::model::KEY_SEPARATOR);
        composed.push_str(part);
    }
    composed
}

/// Translate `offset`/`n` paging into an inclusive `(begin, end)` range.
/// Returns `None` when nothing should be read.
pub fn page(offset: usize, n: usize) -> Option<(usize, isize)> {
    if n == 0 {
        return None;
    }
    let end = offset.saturating_add(n - 1).min(isize::MAX as usize);
    Some((offset, end as isize))
}

//! # Cluster Registry
//!
//! Process-local membership table of worker and server nodes, refreshed by
//! heartbeats and guarded by a single reader/writer lock. Nothing is
//! persisted; membership is rebuilt from heartbeats after a restart.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    Worker,
    Server,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub node_type: NodeType,
    pub address: String,
    pub last_seen: DateTime<Utc>,
}

impl NodeInfo {
    pub fn new(id: impl Into<String>, node_type: NodeType, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type,
            address: address.into(),
            last_seen: Utc::now(),
        }
    }
}

/// Nodes grouped by type, each group ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeList {
    pub workers: Vec<NodeInfo>,
    pub servers: Vec<NodeInfo>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCounts {
    pub workers: usize,
    pub servers: usize,
}

#[derive(Debug, Default)]
pub struct ClusterRegistry {
    nodes: RwLock<BTreeMap<String, NodeInfo>>,
}

impl ClusterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or refresh a node.
    pub fn register(&self, node: NodeInfo) {
        let mut nodes = self.nodes.write();
        if !nodes.contains_key(&node.id) {
            info!(node = %node.id, node_type = ?node.node_type, address = %node.address, "node joined");
        }
        nodes.insert(node.id.clone(), node);
    }

    pub fn remove(&self, id: &str) -> Option<NodeInfo> {
        let removed = self.nodes.write().remove(id);
        if removed.is_some() {
            info!(node = id, "node removed");
        }
        removed
    }

    pub fn list(&self) -> NodeList {
        let nodes = self.nodes.read();
        let mut list = NodeList::default();
        for node in nodes.values() {
            match node.node_type {
                NodeType::Worker => list.workers.push(node.clone()),
                NodeType::Server => list.servers.push(node.clone()),
            }
        }
        list
    }

    pub fn counts(&self) -> NodeCounts {
        let nodes = self.nodes.read();
        let workers = nodes
            .values()
            .filter(|n| n.node_type == NodeType::Worker)
            .count();
        NodeCounts {
            workers,
            servers: nodes.len() - workers,
        }
    }

    /// Drop nodes not seen within `ttl` of `now`. Returns the evicted ids.
    pub fn evict_expired(&self, now: DateTime<Utc>, ttl: Duration) -> Vec<String> {
        let mut nodes = self.nodes.write();
        let expired: Vec<String> = nodes
            .values()
            .filter(|node| now - node.last_seen > ttl)
            .map(|node| node.id.clone())
            .collect();
        for id in &expired {
            nodes.remove(id);
            debug!(node = %id, "node expired");
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_register_refreshes_and_groups() {
        let registry = ClusterRegistry::new();
        registry.register(NodeInfo::new("w2", NodeType::Worker, "10.0.0.2:8087"));
        registry.register(NodeInfo::new("w1", NodeType::Worker, "10.0.0.1:8087"));
        registry.register(NodeInfo::new("s1", NodeType::Server, "10.0.0.9:8087"));
        registry.register(NodeInfo::new("w1", NodeType::Worker, "10.0.0.3:8087"));

        let list = registry.list();
        let workers: Vec<&str> = list.workers.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(workers, ["w1", "w2"]);
        assert_eq!(list.workers[0].address, "10.0.0.3:8087");
        assert_eq!(list.servers.len(), 1);
        assert_eq!(registry.counts(), NodeCounts { workers: 2, servers: 1 });
    }

    #[test]
    fn test_remove() {
        let registry = ClusterRegistry::new();
        registry.register(NodeInfo::new("w", NodeType::Worker, "a"));
        assert!(registry.remove("w").is_some());
        assert!(registry.remove("w").is_none());
        assert_eq!(registry.counts(), NodeCounts::default());
    }

    #[test]
    fn test_evict_expired() {
        let registry = ClusterRegistry::new();
        let now = Utc::now();
        let mut stale = NodeInfo::new("old", NodeType::Server, "a");
        stale.last_seen = now - Duration::seconds(120);
        registry.register(stale);
        registry.register(NodeInfo::new("fresh", NodeType::Worker, "b"));

        let evicted = registry.evict_expired(now, Duration::seconds(30));
        assert_eq!(evicted, ["old"]);
        assert_eq!(registry.counts(), NodeCounts { workers: 1, servers: 0 });
    }

    #[test]
    fn test_concurrent_heartbeats() {
        let registry = Arc::new(ClusterRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..50 {
                        registry.register(NodeInfo::new(format!("w{i}"), NodeType::Worker, "x"));
                        let _ = registry.list();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.counts().workers, 8);
    }
}

//! Cluster node registry (spec §4.8): the node set a worker may be placed
//! on is `{self} ∪ connected_peers \ ignored_nodes`. Membership and
//! node-discovery themselves are assumed externally configured (out of
//! scope); this module only tracks the resulting set and the ignore-list
//! the Master can apply.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Static cluster membership as seen by this process — who the known peers
/// are, parsed once at startup. Discovery (how peers are found) happens
/// outside the core; this struct just holds the resulting list.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub self_node: String,
    pub peers: Vec<String>,
}

impl ClusterConfig {
    pub fn from_env() -> Self {
        let self_node = std::env::var("CLUSTER_NODE_ID")
            .unwrap_or_else(|_| std::env::var("HOSTNAME").unwrap_or_else(|_| "self".to_string()));
        let peers = std::env::var("CLUSTER_NODES")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        Self { self_node, peers }
    }

    #[cfg(test)]
    pub fn for_testing(self_node: &str, peers: &[&str]) -> Self {
        Self {
            self_node: self_node.to_string(),
            peers: peers.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Shared, cheaply-clonable handle over the node set; the Master mutates
/// `ignored` via `ignore_node` (spec §4.9), every worker placement call
/// reads the resulting list.
#[derive(Clone)]
pub struct ClusterHandle {
    config: ClusterConfig,
    ignored: Arc<Mutex<HashSet<String>>>,
}

impl ClusterHandle {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            ignored: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// `{self} ∪ connected_peers \ ignored_nodes`, in a stable order (self
    /// first, then peers as configured) so round-robin placement is
    /// deterministic for a fixed ignore-set.
    pub fn known_nodes(&self) -> Vec<String> {
        let ignored = self.ignored.lock().unwrap();
        std::iter::once(self.config.self_node.clone())
            .chain(self.config.peers.iter().cloned())
            .filter(|node| !ignored.contains(node))
            .collect()
    }

    /// Marks `node` ignorable; future placements skip it (spec §4.9
    /// `ignore_node`).
    pub fn ignore_node(&self, node: &str) {
        self.ignored.lock().unwrap().insert(node.to_string());
    }

    pub fn is_ignored(&self, node: &str) -> bool {
        self.ignored.lock().unwrap().contains(node)
    }

    /// The static membership this handle was built from (self node + peers,
    /// before the ignore-list is applied).
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }
}

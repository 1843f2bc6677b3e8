use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::node::{Node, NodeStatus, ROLE_WORKER};

/// The persisted subset of a node: enough to rebuild its client after a
/// restart. Labels and status are refreshed live and never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub name: String,
    pub addr: String,
    pub token: String,
}

/// Concurrent collection of node records, keyed by the unique node name.
/// Iteration order is registration order, which both the persisted roster
/// and scheduler tie-breaking rely on.
#[derive(Default)]
pub struct NodeRegistry {
    nodes: RwLock<IndexMap<String, Arc<Node>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Seeds a node as-is, keeping its current status. Used when reloading
    /// the persisted roster at startup.
    pub fn insert(&self, node: Arc<Node>) {
        self.nodes.write().insert(node.name.clone(), node);
    }

    /// Registration path. An existing record with the same (name, addr) is
    /// refreshed in place: labels replaced, status back to Ready. Anything
    /// else (new name, or a known name advertising a new address) gets a
    /// fresh Ready record under that name.
    pub fn upsert(
        &self,
        name: &str,
        addr: &str,
        token: &str,
        labels: HashMap<String, String>,
    ) -> anyhow::Result<Arc<Node>> {
        let mut nodes = self.nodes.write();
        if let Some(existing) = nodes.get(name)
            && existing.addr == addr
        {
            existing.set_labels(labels);
            existing.set_status(NodeStatus::Ready);
            return Ok(existing.clone());
        }
        let node = Arc::new(Node::new(name, addr, token, ROLE_WORKER)?);
        node.set_labels(labels);
        node.set_status(NodeStatus::Ready);
        nodes.insert(name.to_owned(), node.clone());
        Ok(node)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.read().get(name).cloned()
    }

    /// Snapshot of all records, Removed ones included.
    pub fn list(&self) -> Vec<Arc<Node>> {
        self.nodes.read().values().cloned().collect()
    }

    pub fn update_status(&self, name: &str, status: NodeStatus) -> bool {
        match self.nodes.read().get(name) {
            Some(node) => {
                node.set_status(status);
                true
            }
            None => false,
        }
    }

    /// Soft delete. The record stays listed (status Removed) so operators
    /// can see it; only a fresh register revives it.
    pub fn mark_removed(&self, name: &str) -> bool {
        self.update_status(name, NodeStatus::Removed)
    }

    /// The persisted subset, in registration order.
    pub fn snapshot(&self) -> Vec<RosterEntry> {
        self.nodes
            .read()
            .values()
            .map(|node| RosterEntry {
                name: node.name.clone(),
                addr: node.addr.clone(),
                token: node.token().to_owned(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let registry = NodeRegistry::new();
        for _ in 0..2 {
            registry
                .upsert(
                    "node0",
                    "http://127.0.0.1:7430",
                    "secret",
                    labels(&[("disktype", "ssd")]),
                )
                .unwrap();
        }
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot().len(), 1);
        let node = registry.get("node0").unwrap();
        assert_eq!(node.status(), NodeStatus::Ready);
        assert_eq!(node.labels(), labels(&[("disktype", "ssd")]));
    }

    #[test]
    fn test_upsert_refreshes_labels_and_status() {
        let registry = NodeRegistry::new();
        let node = registry
            .upsert("node0", "http://127.0.0.1:7430", "secret", HashMap::new())
            .unwrap();
        node.set_status(NodeStatus::Unknown);
        registry
            .upsert(
                "node0",
                "http://127.0.0.1:7430",
                "secret",
                labels(&[("region", "us-west-1")]),
            )
            .unwrap();
        let node = registry.get("node0").unwrap();
        assert_eq!(node.status(), NodeStatus::Ready);
        assert_eq!(node.labels(), labels(&[("region", "us-west-1")]));
    }

    #[test]
    fn test_upsert_new_addr_replaces_record() {
        let registry = NodeRegistry::new();
        registry
            .upsert("node0", "http://127.0.0.1:7430", "secret", HashMap::new())
            .unwrap();
        registry
            .upsert("node0", "http://127.0.0.1:7431", "secret", HashMap::new())
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("node0").unwrap().addr, "http://127.0.0.1:7431");
    }

    #[test]
    fn test_mark_removed_keeps_record_listed() {
        let registry = NodeRegistry::new();
        registry
            .upsert("node0", "http://127.0.0.1:7430", "secret", HashMap::new())
            .unwrap();
        assert!(registry.mark_removed("node0"));
        assert!(!registry.mark_removed("missing"));
        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status(), NodeStatus::Removed);
        // The persisted subset keeps the row; restart + re-register cleans it.
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_list_keeps_registration_order() {
        let registry = NodeRegistry::new();
        for name in ["node2", "node0", "node1"] {
            registry
                .upsert(name, "http://127.0.0.1:7430", "secret", HashMap::new())
                .unwrap();
        }
        let names: Vec<_> = registry.list().iter().map(|n| n.name.clone()).collect();
        assert_eq!(names, ["node2", "node0", "node1"]);
    }
}

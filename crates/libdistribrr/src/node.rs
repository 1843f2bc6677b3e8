use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::agent::client::AgentClient;
use crate::middleware::CorrelationId;
use crate::stats::Stats;
use crate::task::TaskEvent;

pub const ROLE_WORKER: &str = "worker";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Ready,
    NotReady,
    Unknown,
    /// Soft-deleted. Ignored by health checks and scheduling; only a fresh
    /// register revives the node.
    Removed,
}

/// The coordinator's record of one agent. Identity is immutable; status,
/// labels and last-observed stats are refreshed by the health-check loop,
/// re-registration and the scheduler.
pub struct Node {
    pub name: String,
    pub addr: String,
    pub role: String,
    pub date_created: DateTime<Utc>,
    token: String,
    status: RwLock<NodeStatus>,
    labels: RwLock<HashMap<String, String>>,
    stats: RwLock<Stats>,
    client: AgentClient,
}

impl Node {
    pub fn new(name: &str, addr: &str, token: &str, role: &str) -> anyhow::Result<Self> {
        Ok(Self {
            name: name.to_owned(),
            addr: addr.to_owned(),
            role: role.to_owned(),
            date_created: Utc::now(),
            token: token.to_owned(),
            status: RwLock::new(NodeStatus::NotReady),
            labels: RwLock::new(HashMap::new()),
            stats: RwLock::new(Stats::default()),
            client: AgentClient::new(addr, name, token)?,
        })
    }

    pub(crate) fn token(&self) -> &str {
        &self.token
    }

    pub fn status(&self) -> NodeStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: NodeStatus) {
        *self.status.write() = status;
    }

    pub fn labels(&self) -> HashMap<String, String> {
        self.labels.read().clone()
    }

    pub fn set_labels(&self, labels: HashMap<String, String>) {
        *self.labels.write() = labels;
    }

    /// Last stats observed by [`Node::fetch_stats`].
    pub fn stats(&self) -> Stats {
        self.stats.read().clone()
    }

    pub async fn start_task(&self, cid: &CorrelationId, event: &TaskEvent) -> anyhow::Result<()> {
        self.client.start_task(cid, event).await
    }

    pub async fn health_check(&self, cid: &CorrelationId) -> anyhow::Result<()> {
        self.client.health_check(cid).await
    }

    pub async fn verify(&self, cid: &CorrelationId) -> anyhow::Result<()> {
        self.client.verify(cid).await
    }

    /// Fetches fresh stats from the agent and caches them on the record.
    pub async fn fetch_stats(&self, cid: &CorrelationId) -> anyhow::Result<Stats> {
        let stats = self.client.get_stats(cid).await?;
        *self.stats.write() = stats.clone();
        Ok(stats)
    }

    /// Returns the labels known for this node, asking the agent only when
    /// none were supplied at registration.
    pub async fn fetch_labels(&self, cid: &CorrelationId) -> anyhow::Result<HashMap<String, String>> {
        {
            let labels = self.labels.read();
            if !labels.is_empty() {
                return Ok(labels.clone());
            }
        }
        let labels = self.client.get_labels(cid).await?;
        *self.labels.write() = labels.clone();
        Ok(labels)
    }

    pub fn view(&self) -> NodeView {
        NodeView {
            name: self.name.clone(),
            addr: self.addr.clone(),
            role: self.role.clone(),
            date_created: self.date_created,
            status: self.status(),
            labels: self.labels(),
        }
    }
}

/// Serializable snapshot of a node, as returned by `GET /node`. Carries
/// neither the token nor the last-observed stats.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeView {
    pub name: String,
    pub addr: String,
    pub role: String,
    pub date_created: DateTime<Utc>,
    pub status: NodeStatus,
    pub labels: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_node_starts_not_ready() {
        let node = Node::new("node0", "http://127.0.0.1:7430", "secret", ROLE_WORKER).unwrap();
        assert_eq!(node.status(), NodeStatus::NotReady);
        assert!(node.labels().is_empty());
    }

    #[test]
    fn test_invalid_addr_is_rejected() {
        assert!(Node::new("node0", "not a url", "secret", ROLE_WORKER).is_err());
    }

    #[test]
    fn test_view_has_no_token() {
        let node = Node::new("node0", "http://127.0.0.1:7430", "secret", ROLE_WORKER).unwrap();
        node.set_status(NodeStatus::Ready);
        let view = serde_json::to_value(node.view()).unwrap();
        assert_eq!(view["status"], "READY");
        assert!(view.get("token").is_none());
    }
}

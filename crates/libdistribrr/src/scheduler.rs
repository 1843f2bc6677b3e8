use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, error};

use crate::middleware::CorrelationId;
use crate::node::{Node, NodeStatus};
use crate::stats::{ClientStatus, Stats};
use crate::task::Task;

const BASE_SCORE: f64 = 100.0;
const IDLE_CLIENT_BONUS: f64 = 20.0;
const SECONDS_PER_DAY: i64 = 86_400;

/// A node that survived [`Scheduler::select_candidates`], paired with the
/// stats snapshot the decision was made on.
#[derive(Clone)]
pub struct Candidate {
    pub node: Arc<Node>,
    pub stats: Stats,
}

/// Three ordered phases: SELECT drops unusable nodes, SCORE ranks the rest,
/// PICK bounds the fan-out.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn select_candidates(
        &self,
        task: &Task,
        nodes: &[Arc<Node>],
        cid: &CorrelationId,
    ) -> Vec<Candidate>;

    fn score(&self, task: &Task, candidates: &[Candidate]) -> HashMap<String, f64>;

    fn pick_n(
        &self,
        scores: &HashMap<String, f64>,
        candidates: &[Candidate],
        number: usize,
    ) -> Vec<Arc<Node>>;
}

/// Prefers nodes whose torrent clients are closest to idle. An idle client
/// earns a bounded bonus; every active torrent costs a penalty that shrinks
/// as it approaches completion, so a client about to free a slot is not
/// punished like a freshly started one.
pub struct LeastActive;

#[async_trait]
impl Scheduler for LeastActive {
    async fn select_candidates(
        &self,
        task: &Task,
        nodes: &[Arc<Node>],
        cid: &CorrelationId,
    ) -> Vec<Candidate> {
        let checks = nodes.iter().map(|node| async move {
            if node.status() != NodeStatus::Ready {
                return None;
            }

            let labels = match node.fetch_labels(cid).await {
                Ok(labels) => labels,
                Err(e) => {
                    error!(node = %node.name, "could not get labels for node: {e:#}");
                    return None;
                }
            };
            if !labels_match(&task.labels, &labels) {
                return None;
            }

            let stats = match node.fetch_stats(cid).await {
                Ok(stats) => stats,
                Err(e) => {
                    error!(node = %node.name, "could not get stats for node: {e:#}");
                    return None;
                }
            };
            if stats
                .client_stats
                .values()
                .any(|client| client.status != ClientStatus::Ready)
            {
                debug!(node = %node.name, "torrent client not ready, skipping node");
                return None;
            }

            Some(Candidate {
                node: node.clone(),
                stats,
            })
        });

        join_all(checks).await.into_iter().flatten().collect()
    }

    fn score(&self, _task: &Task, candidates: &[Candidate]) -> HashMap<String, f64> {
        let mut scores = HashMap::new();

        for candidate in candidates {
            let mut score = BASE_SCORE;

            for client in candidate.stats.client_stats.values() {
                if client.active_downloads_count == 0 {
                    score += IDLE_CLIENT_BONUS;
                    continue;
                }

                for torrent in &client.active_downloads {
                    let mut penalty = (1.0 - torrent.progress) * 0.7 * 10.0;
                    if torrent.eta > 0 {
                        penalty +=
                            torrent.eta.min(SECONDS_PER_DAY) as f64 / SECONDS_PER_DAY as f64
                                * 0.3
                                * 10.0;
                    }
                    score -= penalty;
                }
            }

            scores.insert(candidate.node.name.clone(), score);
        }

        scores
    }

    fn pick_n(
        &self,
        scores: &HashMap<String, f64>,
        candidates: &[Candidate],
        number: usize,
    ) -> Vec<Arc<Node>> {
        // 0 means unbounded: every candidate gets the task.
        if number == 0 {
            return candidates.iter().map(|c| c.node.clone()).collect();
        }

        let mut ranked: Vec<&Candidate> = candidates.iter().collect();
        // Stable sort: ties keep candidate order.
        ranked.sort_by(|a, b| {
            let score_a = scores.get(&a.node.name).copied().unwrap_or_default();
            let score_b = scores.get(&b.node.name).copied().unwrap_or_default();
            score_b.partial_cmp(&score_a).unwrap_or(Ordering::Equal)
        });

        ranked
            .into_iter()
            .take(number)
            .map(|c| c.node.clone())
            .collect()
    }
}

/// True iff the node carries every task label with an equal value. Extra
/// labels on the node do not matter.
pub fn labels_match(
    task_labels: &HashMap<String, String>,
    node_labels: &HashMap<String, String>,
) -> bool {
    task_labels
        .iter()
        .all(|(key, value)| node_labels.get(key) == Some(value))
}

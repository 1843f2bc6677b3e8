use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info, trace, warn};

use crate::middleware::CorrelationId;
use crate::node::Node;
use crate::registry::NodeRegistry;
use crate::scheduler::{LeastActive, Scheduler};
use crate::task::{Task, TaskEvent};

/// Outcome of one fan-out, for logging and tests. Callers of `/tasks` never
/// see it: dispatch is fire-and-forget.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub selected: usize,
    pub succeeded: usize,
}

/// Runs the scheduling pipeline for one task event and fans the task out to
/// the picked nodes. Failed nodes are logged, never retried.
pub struct Dispatcher {
    registry: Arc<NodeRegistry>,
    scheduler: Box<dyn Scheduler>,
}

impl Dispatcher {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            registry,
            scheduler: Box::new(LeastActive),
        }
    }

    pub async fn dispatch(&self, cid: &CorrelationId, event: &TaskEvent) -> DispatchReport {
        debug!(task_id = %event.task.id, name = %event.task.name, "received task");

        let picked = self.select_workers(cid, &event.task).await;
        if picked.is_empty() {
            info!(task_id = %event.task.id, "found no nodes to send work to");
            return DispatchReport::default();
        }
        debug!(count = picked.len(), "selected nodes");

        let outcomes = join_all(picked.iter().map(|node| async move {
            debug!(node = %node.name, "sending task");
            match node.start_task(cid, event).await {
                Ok(()) => {
                    info!(node = %node.name, "successfully sent task");
                    true
                }
                Err(e) => {
                    error!(node = %node.name, "could not send task to node: {e:#}");
                    false
                }
            }
        }))
        .await;

        let succeeded = outcomes.into_iter().filter(|ok| *ok).count();
        if succeeded == 0 {
            warn!(task_id = %event.task.id, "task was not accepted by any node");
        } else {
            info!(task_id = %event.task.id, nodes = succeeded, "successfully scheduled download");
        }

        DispatchReport {
            selected: picked.len(),
            succeeded,
        }
    }

    async fn select_workers(&self, cid: &CorrelationId, task: &Task) -> Vec<Arc<Node>> {
        let nodes = self.registry.list();

        let candidates = self.scheduler.select_candidates(task, &nodes, cid).await;
        if candidates.is_empty() {
            return Vec::new();
        }

        let scores = self.scheduler.score(task, &candidates);
        if scores.is_empty() {
            return Vec::new();
        }

        trace!(replicas = task.replicas, "picking nodes");
        self.scheduler.pick_n(&scores, &candidates, task.replicas)
    }
}

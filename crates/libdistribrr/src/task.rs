use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A torrent download with routing hints. Immutable once accepted.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub download_url: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub indexer: String,
    #[serde(default)]
    pub scheduler_type: String,
    /// How many nodes should receive the task. 0 means "every matching node".
    #[serde(default)]
    pub replicas: usize,
    /// Label selector: a node matches iff it carries every pair.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    // Resource hints, advisory only.
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub memory: u64,
    #[serde(default)]
    pub disk: u64,
    #[serde(default)]
    pub force_add: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn can_transition_to(self, dst: TaskState) -> bool {
        use TaskState::*;
        match self {
            Pending => matches!(dst, Scheduled),
            Scheduled => matches!(dst, Scheduled | Running | Failed),
            Running => matches!(dst, Running | Completed | Failed | Scheduled),
            // Completed is terminal.
            Completed => false,
            Failed => matches!(dst, Scheduled),
        }
    }
}

pub fn valid_state_transition(src: TaskState, dst: TaskState) -> bool {
    src.can_transition_to(dst)
}

/// Envelope around a [`Task`] for lifecycle tracking.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: Uuid,
    pub state: TaskState,
    pub timestamp: DateTime<Utc>,
    pub task: Task,
}

impl TaskEvent {
    pub fn new(task: Task) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: TaskState::Pending,
            timestamp: Utc::now(),
            task,
        }
    }
}

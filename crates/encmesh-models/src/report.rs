//! Status reports sent to the master.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobId;
use crate::node::NodeState;
use crate::progress::Progress;

/// Progress snapshot of one in-flight task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    /// Unique id of the reporting node
    pub unid: String,
    pub task_id: u32,
    pub job_id: JobId,
    pub progress: Progress,
}

/// Snapshot of a node's state and in-flight tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub unid: String,
    pub status: NodeState,
    pub tasks: Vec<TaskReport>,
    pub generated_at: DateTime<Utc>,
}

impl StatusReport {
    pub fn new(unid: impl Into<String>, status: NodeState, tasks: Vec<TaskReport>) -> Self {
        Self {
            unid: unid.into(),
            status,
            tasks,
            generated_at: Utc::now(),
        }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

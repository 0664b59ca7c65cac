//! Structured node logging.
//!
//! Every state transition and task outcome is logged with the node name so
//! logs from several workers can be merged.

use tracing::{error, info, warn, Span};

use encmesh_models::{NodeState, TaskKey, TaskKind};

/// Logger carrying the node name as a structured field.
#[derive(Debug, Clone)]
pub struct NodeLogger {
    node: String,
}

impl NodeLogger {
    pub fn new(node: impl Into<String>) -> Self {
        Self { node: node.into() }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn transition(&self, from: NodeState, to: NodeState) {
        info!(node = %self.node, %from, %to, "Status changed");
    }

    pub fn task_accepted(&self, key: &TaskKey, kind: TaskKind) {
        info!(
            node = %self.node,
            job_id = %key.job_id,
            task_id = key.task_id,
            %kind,
            "Task accepted"
        );
    }

    pub fn task_refused(&self, key: &TaskKey, kind: TaskKind, status: NodeState) {
        info!(
            node = %self.node,
            job_id = %key.job_id,
            task_id = key.task_id,
            %kind,
            %status,
            "Task refused"
        );
    }

    pub fn task_started(&self, key: &TaskKey) {
        info!(node = %self.node, job_id = %key.job_id, task_id = key.task_id, "Task started");
    }

    pub fn task_completed(&self, key: &TaskKey) {
        info!(node = %self.node, job_id = %key.job_id, task_id = key.task_id, "Task completed");
    }

    pub fn task_failed(&self, key: &TaskKey) {
        warn!(node = %self.node, job_id = %key.job_id, task_id = key.task_id, "Task failed");
    }

    pub fn log_warning(&self, message: &str) {
        warn!(node = %self.node, "{}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(node = %self.node, "{}", message);
    }

    /// Span for work done on behalf of this node.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("node", node = %self.node)
    }
}

//! Tasks executing on this node.

use parking_lot::RwLock;
use std::sync::Arc;

use encmesh_models::{ClientTask, Progress, TaskKey, TaskKind, TaskReport};

/// A task accepted by this node, with its live progress.
///
/// Clones share the progress cell. Equality is by task identity.
#[derive(Debug, Clone)]
pub struct InFlightTask {
    task: Arc<ClientTask>,
    progress: Arc<RwLock<Progress>>,
}

impl InFlightTask {
    /// Progress restarts from the task's own pass and unit counts; whatever
    /// the sender put in the task's progress field is ignored.
    pub fn new(task: ClientTask) -> Self {
        let progress = Progress::new(task.task.step_count, task.task.unit_count, task.task.unit);
        Self {
            task: Arc::new(task),
            progress: Arc::new(RwLock::new(progress)),
        }
    }

    pub fn task(&self) -> &ClientTask {
        &self.task
    }

    pub fn key(&self) -> TaskKey {
        self.task.key()
    }

    pub fn kind(&self) -> TaskKind {
        self.task.kind()
    }

    /// Shared progress cell, written only by the executing converter.
    pub fn progress(&self) -> &Arc<RwLock<Progress>> {
        &self.progress
    }

    pub fn progress_snapshot(&self) -> Progress {
        self.progress.read().clone()
    }

    pub fn report(&self, unid: &str) -> TaskReport {
        TaskReport {
            unid: unid.to_string(),
            task_id: self.task.task.task_id,
            job_id: self.task.task.job_id.clone(),
            progress: self.progress_snapshot(),
        }
    }
}

impl PartialEq for InFlightTask {
    fn eq(&self, other: &Self) -> bool {
        self.task.task.task_id == other.task.task.task_id
            && self.task.task.job_id == other.task.task.job_id
    }
}

impl Eq for InFlightTask {}

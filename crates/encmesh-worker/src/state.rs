//! Node lifecycle state.
//!
//! The node description, its status and the in-flight task list live in one
//! cell behind a single mutex. Every status report is built from one locked
//! read of that cell, so a report never shows WORKING without tasks.

use parking_lot::Mutex;

use encmesh_models::{Node, NodeState, StatusReport, TaskKey};

use crate::error::{WorkerError, WorkerResult};
use crate::inflight::InFlightTask;
use crate::logging::NodeLogger;
use crate::metrics;

struct NodeCell {
    node: Node,
    tasks: Vec<InFlightTask>,
}

impl NodeCell {
    fn set_status(&mut self, next: NodeState, logger: &NodeLogger) -> WorkerResult<NodeState> {
        let prev = self.node.status;
        if !prev.can_transition_to(next) || (next == NodeState::Working && self.tasks.is_empty())
        {
            return Err(WorkerError::IllegalTransition { from: prev, to: next });
        }
        self.node.status = next;
        if prev != next {
            logger.transition(prev, next);
            metrics::record_transition(next);
        }
        Ok(prev)
    }
}

/// Authoritative status of this node.
pub struct NodeMachine {
    cell: Mutex<NodeCell>,
    logger: NodeLogger,
}

impl NodeMachine {
    pub fn new(node: Node) -> Self {
        let logger = NodeLogger::new(node.name.clone());
        Self {
            cell: Mutex::new(NodeCell {
                node,
                tasks: Vec::new(),
            }),
            logger,
        }
    }

    pub fn logger(&self) -> &NodeLogger {
        &self.logger
    }

    pub fn status(&self) -> NodeState {
        self.cell.lock().node.status
    }

    /// Snapshot of the node description.
    pub fn node(&self) -> Node {
        self.cell.lock().node.clone()
    }

    pub fn unid(&self) -> String {
        self.cell.lock().node.unid.clone()
    }

    pub fn set_unid(&self, unid: impl Into<String>) {
        self.cell.lock().node.unid = unid.into();
    }

    pub fn set_port(&self, port: u16) {
        self.cell.lock().node.port = port;
    }

    pub fn tasks(&self) -> Vec<InFlightTask> {
        self.cell.lock().tasks.clone()
    }

    pub fn task_count(&self) -> usize {
        self.cell.lock().tasks.len()
    }

    pub fn contains(&self, key: &TaskKey) -> bool {
        self.cell.lock().tasks.iter().any(|t| &t.key() == key)
    }

    pub fn find(&self, key: &TaskKey) -> Option<InFlightTask> {
        self.cell.lock().tasks.iter().find(|t| &t.key() == key).cloned()
    }

    /// Status report built from one consistent read.
    pub fn report(&self) -> StatusReport {
        let cell = self.cell.lock();
        let tasks = cell.tasks.iter().map(|t| t.report(&cell.node.unid)).collect();
        StatusReport::new(cell.node.unid.clone(), cell.node.status, tasks)
    }

    /// Move to `next`. Returns the previous status.
    pub fn transition(&self, next: NodeState) -> WorkerResult<NodeState> {
        self.cell.lock().set_status(next, &self.logger)
    }

    /// Move to `next` only if the status is still `expected`.
    pub fn compare_and_transition(&self, expected: NodeState, next: NodeState) -> WorkerResult<bool> {
        let mut cell = self.cell.lock();
        if cell.node.status != expected {
            return Ok(false);
        }
        cell.set_status(next, &self.logger)?;
        Ok(true)
    }

    /// Add an accepted task and mark the node WORKING.
    pub fn admit(&self, task: InFlightTask) -> WorkerResult<NodeState> {
        let mut cell = self.cell.lock();
        let prev = cell.node.status;
        if !prev.accepts_tasks() {
            return Err(WorkerError::IllegalTransition {
                from: prev,
                to: NodeState::Working,
            });
        }
        cell.tasks.push(task);
        cell.set_status(NodeState::Working, &self.logger)
    }

    /// Remove a finished or withdrawn task. The node falls back to FREE when
    /// its last task leaves a WORKING node.
    pub fn retire(&self, key: &TaskKey) -> Option<InFlightTask> {
        let mut cell = self.cell.lock();
        let pos = cell.tasks.iter().position(|t| &t.key() == key)?;
        let task = cell.tasks.remove(pos);
        if cell.tasks.is_empty() && cell.node.status == NodeState::Working {
            let _ = cell.set_status(NodeState::Free, &self.logger);
        }
        Some(task)
    }

    /// Administrative pause of a FREE or WORKING node.
    pub fn pause(&self) -> WorkerResult<NodeState> {
        self.transition(NodeState::Paused)
    }

    /// Leave PAUSED: WORKING if tasks remain, else FREE.
    pub fn resume(&self) -> WorkerResult<NodeState> {
        let mut cell = self.cell.lock();
        if cell.node.status != NodeState::Paused {
            return Err(WorkerError::IllegalTransition {
                from: cell.node.status,
                to: NodeState::Free,
            });
        }
        let next = if cell.tasks.is_empty() {
            NodeState::Free
        } else {
            NodeState::Working
        };
        cell.set_status(next, &self.logger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inflight::tests::audio_task;

    fn machine() -> NodeMachine {
        NodeMachine::new(Node::new("127.0.0.1".parse().unwrap(), 1338, "worker-a"))
    }

    fn connected() -> NodeMachine {
        let m = machine();
        m.set_unid("abc123");
        m.transition(NodeState::Free).unwrap();
        m
    }

    #[test]
    fn test_initial_state() {
        let m = machine();
        assert_eq!(m.status(), NodeState::NotConnected);
        assert_eq!(m.report().task_count(), 0);
    }

    #[test]
    fn test_working_requires_tasks() {
        let m = connected();
        assert!(matches!(
            m.transition(NodeState::Working),
            Err(WorkerError::IllegalTransition { .. })
        ));
        assert_eq!(m.status(), NodeState::Free);
    }

    #[test]
    fn test_admit_and_retire() {
        let m = connected();
        let a = InFlightTask::new(audio_task("j", 0));
        let b = InFlightTask::new(audio_task("j", 1));

        assert_eq!(m.admit(a.clone()).unwrap(), NodeState::Free);
        assert_eq!(m.admit(b.clone()).unwrap(), NodeState::Working);

        let report = m.report();
        assert_eq!(report.status, NodeState::Working);
        assert_eq!(report.task_count(), 2);
        assert_eq!(report.unid, "abc123");
        let ids: Vec<u32> = report.tasks.iter().map(|t| t.task_id).collect();
        assert_eq!(ids, vec![0, 1]);

        m.retire(&a.key()).unwrap();
        assert_eq!(m.status(), NodeState::Working);
        m.retire(&b.key()).unwrap();
        assert_eq!(m.status(), NodeState::Free);
        assert!(m.retire(&b.key()).is_none());
    }

    #[test]
    fn test_admit_refused_when_not_connected() {
        let m = machine();
        let err = m.admit(InFlightTask::new(audio_task("j", 0))).unwrap_err();
        assert!(matches!(err, WorkerError::IllegalTransition { .. }));
        assert_eq!(m.task_count(), 0);
    }

    #[test]
    fn test_crashed_is_terminal() {
        let m = connected();
        m.transition(NodeState::Crashed).unwrap();
        assert!(m.transition(NodeState::Free).is_err());
        assert!(m.transition(NodeState::NotConnected).is_err());
        assert_eq!(m.status(), NodeState::Crashed);
    }

    #[test]
    fn test_compare_and_transition() {
        let m = machine();
        assert!(!m.compare_and_transition(NodeState::Free, NodeState::Paused).unwrap());
        assert!(m
            .compare_and_transition(NodeState::NotConnected, NodeState::Free)
            .unwrap());
        assert_eq!(m.status(), NodeState::Free);
    }

    #[test]
    fn test_pause_and_resume() {
        let m = connected();
        let task = InFlightTask::new(audio_task("j", 0));
        m.admit(task.clone()).unwrap();

        m.pause().unwrap();
        m.retire(&task.key());
        assert_eq!(m.status(), NodeState::Paused);
        assert!(m.admit(InFlightTask::new(audio_task("j", 1))).is_err());

        m.resume().unwrap();
        assert_eq!(m.status(), NodeState::Free);
    }

    #[test]
    fn test_link_loss_keeps_tasks_until_retired() {
        let m = connected();
        let task = InFlightTask::new(audio_task("j", 0));
        m.admit(task.clone()).unwrap();

        m.transition(NodeState::NotConnected).unwrap();
        assert_eq!(m.task_count(), 1);
        m.retire(&task.key());
        assert_eq!(m.status(), NodeState::NotConnected);
    }
}

//! Answers to requests the master pushes to this worker.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use encmesh_cluster::{Message, MessageHandler};

use crate::worker::Worker;

/// Routes inbound messages to the worker.
pub struct WorkerHandler {
    worker: Arc<Worker>,
}

impl WorkerHandler {
    pub fn new(worker: Arc<Worker>) -> Self {
        Self { worker }
    }
}

#[async_trait]
impl MessageHandler for WorkerHandler {
    async fn handle(&self, msg: Message) -> Message {
        match msg {
            Message::TaskRequest(task) => {
                if self.worker.task_request(task).await {
                    Message::TaskAccepted
                } else {
                    Message::TaskRefused
                }
            }
            Message::DeleteTask(key) => Message::TaskDeleted {
                removed: self.worker.delete_task(&key).await,
            },
            Message::StatusRequest => Message::Status(self.worker.status_request()),
            Message::Shutdown => {
                let worker = Arc::clone(&self.worker);
                tokio::spawn(async move { worker.shutdown().await });
                Message::Bye
            }
            other => {
                warn!(code = other.code(), "Unexpected message from master");
                Message::Bye
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JsonConfigStore, WorkerConfig};
    use crate::inflight::tests::audio_task;
    use encmesh_models::{JobId, NodeState, TaskKey};
    use tempfile::TempDir;

    fn handler(dir: &TempDir) -> WorkerHandler {
        let config = WorkerConfig {
            name: "worker-a".into(),
            master_host: "127.0.0.1".into(),
            master_port: 9,
            temp_root: dir.path().join("tmp"),
            shared_root: dir.path().join("shared"),
            thread_count: 1,
            ..WorkerConfig::default()
        };
        let store = Arc::new(JsonConfigStore::new(dir.path().join("worker.json")));
        WorkerHandler::new(Worker::new(config, store, vec![]).unwrap())
    }

    #[tokio::test]
    async fn test_status_request() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir);

        match handler.handle(Message::StatusRequest).await {
            Message::Status(report) => {
                assert_eq!(report.status, NodeState::NotConnected);
                assert_eq!(report.task_count(), 0);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_task_refused_while_disconnected() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir);

        let reply = handler
            .handle(Message::TaskRequest(audio_task("j", 0)))
            .await;
        assert_eq!(reply, Message::TaskRefused);
    }

    #[tokio::test]
    async fn test_delete_unknown_task() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir);

        let key = TaskKey::new(JobId::from_string("j"), 3);
        let reply = handler.handle(Message::DeleteTask(key)).await;
        assert_eq!(reply, Message::TaskDeleted { removed: false });
    }

    #[tokio::test]
    async fn test_shutdown_acknowledged() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir);

        assert_eq!(handler.handle(Message::Shutdown).await, Message::Bye);
        let worker = Arc::clone(&handler.worker);
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while !worker.is_shutdown() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_unexpected_message() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir);
        assert_eq!(handler.handle(Message::TaskAccepted).await, Message::Bye);
    }
}

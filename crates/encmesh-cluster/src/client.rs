//! Worker-initiated exchanges with the master.
//!
//! Every exchange opens a fresh connection, sends one message, reads one
//! message and closes. Failures are returned to the caller and never retried
//! here.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use encmesh_models::{Cause, Node, NodeState, StatusReport};

use crate::error::{ClusterError, ClusterResult};
use crate::message::{CrashReport, Message};
use crate::wire::{read_message, write_message};

/// Default bound of each connect, write and read step.
pub const DEFAULT_CONTACT_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The master assigned this identifier
    Assigned(String),
    /// The master confirmed the identifier the worker sent
    Confirmed,
}

/// Outcome of a status notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusAck {
    Delivered,
    /// The master does not know the worker's identifier
    Stale,
}

/// Address and timeout of the master endpoint.
#[derive(Debug, Clone)]
pub struct MasterLink {
    addr: String,
    timeout: Duration,
}

impl MasterLink {
    pub fn new(host: impl AsRef<str>, port: u16) -> Self {
        Self {
            addr: format!("{}:{}", host.as_ref(), port),
            timeout: DEFAULT_CONTACT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send one message and read exactly one response.
    pub async fn exchange(&self, msg: &Message) -> ClusterResult<Message> {
        let stream = self
            .bounded(TcpStream::connect(&self.addr))
            .await?
            .map_err(|e| ClusterError::connection_failed(format!("{}: {}", self.addr, e)))?;

        let (read_half, mut write_half) = stream.into_split();
        self.bounded(write_message(&mut write_half, msg)).await??;

        let mut reader = BufReader::new(read_half);
        let response = self.bounded(read_message(&mut reader)).await??;

        let _ = write_half.shutdown().await;
        debug!(sent = msg.code(), received = response.code(), "Exchange with master complete");
        Ok(response)
    }

    /// Register the node. The master either assigns an id or confirms the
    /// one carried in `node`.
    pub async fn register(&self, node: &Node) -> ClusterResult<Registration> {
        match self.exchange(&Message::Connect(node.clone())).await? {
            Message::NewUnid(unid) => Ok(Registration::Assigned(unid)),
            Message::Bye => Ok(Registration::Confirmed),
            other => Err(ClusterError::unexpected("NEW_UNID or BYE", other.code())),
        }
    }

    /// Deliver a status report.
    pub async fn send_status(&self, report: &StatusReport) -> ClusterResult<StatusAck> {
        match self.exchange(&Message::Status(report.clone())).await? {
            Message::Bye => Ok(StatusAck::Delivered),
            Message::NewUnid(_) => Ok(StatusAck::Stale),
            other => Err(ClusterError::unexpected("BYE or NEW_UNID", other.code())),
        }
    }

    /// Tell the master the node is leaving.
    pub async fn disconnect(&self, node: &Node) -> ClusterResult<()> {
        let mut notice = node.clone();
        notice.status = NodeState::NotConnected;
        match self.exchange(&Message::Connect(notice)).await? {
            Message::Bye => Ok(()),
            other => Err(ClusterError::unexpected("BYE", other.code())),
        }
    }

    /// Best-effort crash notification; delivery failures are only logged.
    pub async fn send_crash(&self, unid: &str, cause: Cause) {
        let msg = Message::Crash(CrashReport {
            unid: unid.to_string(),
            cause,
        });
        if let Err(e) = self.exchange(&msg).await {
            warn!(error = %e, %cause, "Crash report not delivered");
        }
    }

    async fn bounded<F: Future>(&self, fut: F) -> ClusterResult<F::Output> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| ClusterError::Timeout(self.timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Accept one connection, record the request, answer with `reply`.
    async fn fake_master(reply: Option<Message>) -> (MasterLink, JoinHandle<Message>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let request = read_message(&mut reader).await.unwrap();
            match reply {
                Some(reply) => write_message(&mut write_half, &reply).await.unwrap(),
                None => tokio::time::sleep(Duration::from_secs(2)).await,
            }
            request
        });
        let link = MasterLink::new("127.0.0.1", port).with_timeout(Duration::from_millis(300));
        (link, handle)
    }

    fn node() -> Node {
        Node::new("127.0.0.1".parse().unwrap(), 2021, "worker-a")
    }

    #[tokio::test]
    async fn test_register_assigns_id() {
        let (link, master) = fake_master(Some(Message::NewUnid("abc123".into()))).await;

        let registration = link.register(&node()).await.unwrap();
        assert_eq!(registration, Registration::Assigned("abc123".into()));

        match master.await.unwrap() {
            Message::Connect(sent) => assert_eq!(sent.name, "worker-a"),
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_register_confirmed() {
        let (link, _master) = fake_master(Some(Message::Bye)).await;
        assert_eq!(link.register(&node()).await.unwrap(), Registration::Confirmed);
    }

    #[tokio::test]
    async fn test_status_stale_identity() {
        let (link, _master) = fake_master(Some(Message::NewUnid(String::new()))).await;
        let report = StatusReport::new("old", NodeState::Free, vec![]);
        assert_eq!(link.send_status(&report).await.unwrap(), StatusAck::Stale);
    }

    #[tokio::test]
    async fn test_unexpected_response() {
        let (link, _master) = fake_master(Some(Message::TaskAccepted)).await;
        let report = StatusReport::new("u", NodeState::Free, vec![]);
        let err = link.send_status(&report).await.unwrap_err();
        assert!(matches!(
            err,
            ClusterError::UnexpectedResponse {
                got: "TASK_ACCEPTED",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_silent_master_times_out() {
        let (link, _master) = fake_master(None).await;
        let report = StatusReport::new("u", NodeState::Free, vec![]);
        let err = link.send_status(&report).await.unwrap_err();
        assert!(matches!(err, ClusterError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_unreachable_master() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let link = MasterLink::new("127.0.0.1", port).with_timeout(Duration::from_millis(300));
        let err = link.disconnect(&node()).await.unwrap_err();
        assert!(matches!(
            err,
            ClusterError::ConnectionFailed(_) | ClusterError::Timeout(_)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_sends_not_connected() {
        let (link, master) = fake_master(Some(Message::Bye)).await;
        let mut free = node();
        free.status = NodeState::Free;

        tokio_test::assert_ok!(link.disconnect(&free).await);
        match master.await.unwrap() {
            Message::Connect(sent) => assert_eq!(sent.status, NodeState::NotConnected),
            other => panic!("unexpected request: {other:?}"),
        }
    }
}

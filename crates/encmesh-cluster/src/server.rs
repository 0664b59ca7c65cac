//! Inbound listener of a worker node.
//!
//! Accepts one message per connection, hands it to a [`MessageHandler`] and
//! writes back exactly one response.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::DEFAULT_CONTACT_TIMEOUT;
use crate::error::{ClusterError, ClusterResult};
use crate::message::Message;
use crate::wire::{read_message, write_message};

/// Answers inbound messages.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, msg: Message) -> Message;
}

/// TCP endpoint the master pushes requests to.
pub struct ClusterServer {
    listener: TcpListener,
    timeout: Duration,
}

impl ClusterServer {
    pub async fn bind(addr: impl ToSocketAddrs) -> ClusterResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            timeout: DEFAULT_CONTACT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> ClusterResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` turns true.
    pub async fn serve(
        self,
        handler: Arc<dyn MessageHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> ClusterResult<()> {
        let addr = self.local_addr()?;
        info!(%addr, "Listening for master requests");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handler = Arc::clone(&handler);
                        let timeout = self.timeout;
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, handler, timeout).await {
                                warn!(%peer, error = %e, "Inbound exchange failed");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }

        info!(%addr, "Listener stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    handler: Arc<dyn MessageHandler>,
    timeout: Duration,
) -> ClusterResult<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let request = tokio::time::timeout(timeout, read_message(&mut reader))
        .await
        .map_err(|_| ClusterError::Timeout(timeout))??;
    let code = request.code();

    let response = handler.handle(request).await;
    debug!(received = code, sent = response.code(), "Answered master request");

    tokio::time::timeout(timeout, write_message(&mut write_half, &response))
        .await
        .map_err(|_| ClusterError::Timeout(timeout))??;
    let _ = write_half.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MasterLink;

    struct Echo;

    #[async_trait]
    impl MessageHandler for Echo {
        async fn handle(&self, msg: Message) -> Message {
            match msg {
                Message::StatusRequest => Message::Bye,
                Message::Shutdown => Message::Bye,
                _ => Message::TaskRefused,
            }
        }
    }

    #[tokio::test]
    async fn test_serves_one_message_per_connection() {
        let server = ClusterServer::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        let (stop_tx, stop_rx) = watch::channel(false);
        let serving = tokio::spawn(server.serve(Arc::new(Echo), stop_rx));

        let link = MasterLink::new("127.0.0.1", port);
        assert_eq!(link.exchange(&Message::StatusRequest).await.unwrap(), Message::Bye);
        assert_eq!(
            link.exchange(&Message::TaskAccepted).await.unwrap(),
            Message::TaskRefused
        );

        stop_tx.send(true).unwrap();
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let server = ClusterServer::bind("127.0.0.1:0").await.unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let serving = tokio::spawn(server.serve(Arc::new(Echo), stop_rx));

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), serving)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

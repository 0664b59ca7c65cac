//! Cluster protocol error types.

use std::time::Duration;
use thiserror::Error;

pub type ClusterResult<T> = Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Exchange timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected response: expected {expected}, got {got}")]
    UnexpectedResponse {
        expected: &'static str,
        got: &'static str,
    },

    #[error("Connection closed before a message was received")]
    Closed,

    #[error("Message exceeds {0} bytes")]
    MessageTooLarge(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClusterError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn unexpected(expected: &'static str, got: &'static str) -> Self {
        Self::UnexpectedResponse { expected, got }
    }
}

//! Worker error types.

use encmesh_models::NodeState;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Illegal status transition {from} -> {to}")]
    IllegalTransition { from: NodeState, to: NodeState },

    #[error("Media error: {0}")]
    Media(#[from] encmesh_media::MediaError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] encmesh_cluster::ClusterError),

    #[error("Model error: {0}")]
    Model(#[from] encmesh_models::ModelError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether the error means the master link is down.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, WorkerError::Cluster(_))
    }
}

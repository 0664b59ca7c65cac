//! Model validation errors.

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Invalid stream configuration: {0}")]
    InvalidStream(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Codec {codec} cannot encode a {expected} stream")]
    CodecMismatch {
        codec: &'static str,
        expected: &'static str,
    },
}

impl ModelError {
    pub fn invalid_stream(msg: impl Into<String>) -> Self {
        Self::InvalidStream(msg.into())
    }

    pub fn invalid_job(msg: impl Into<String>) -> Self {
        Self::InvalidJob(msg.into())
    }

    pub fn invalid_task(msg: impl Into<String>) -> Self {
        Self::InvalidTask(msg.into())
    }
}

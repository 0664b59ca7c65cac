//! Shared data models for the encmesh cluster.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, tasks and their progress
//! - Stream encode configurations and codecs
//! - Node identity and status reports
//! - Task planning (job decomposition into tasks)

pub mod codec;
pub mod error;
pub mod job;
pub mod node;
pub mod progress;
pub mod report;
pub mod strategy;
pub mod stream;
pub mod task;

// Re-export common types
pub use codec::{Codec, CodecKind};
pub use error::{ModelError, ModelResult};
pub use job::{Job, JobId};
pub use node::{Cause, Node, NodeState};
pub use progress::{Progress, ProgressState};
pub use report::{StatusReport, TaskReport};
pub use stream::{
    AudioStreamConfig, ChannelDisposition, RateControl, SourceStream, StreamConfig,
    VideoStreamConfig,
};
pub use task::{ClientTask, Task, TaskKey, TaskKind, Unit};

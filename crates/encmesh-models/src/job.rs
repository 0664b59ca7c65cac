//! Job definitions.
//!
//! A job is owned by the coordinator. Workers only ever see the tasks a job
//! is decomposed into (see [`crate::strategy`]).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::ModelResult;
use crate::stream::StreamConfig;
use crate::task::ClientTask;

/// Default length of a video task window (one minute).
pub const DEFAULT_TASK_LENGTH_MS: u64 = 60_000;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A transcoding job submitted by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub job_id: JobId,

    /// Human readable name
    pub name: String,

    /// Source media file, relative to the shared root
    pub source_file: PathBuf,

    /// Output folder, relative to the shared root
    pub output_folder: PathBuf,

    /// Streams to produce, in output order
    pub streams: Vec<StreamConfig>,

    /// Number of tasks created so far; also the next task id
    #[serde(default)]
    pub task_count: u32,

    /// Length of a video task window in milliseconds
    #[serde(default = "default_task_length")]
    pub task_length_ms: u64,
}

fn default_task_length() -> u64 {
    DEFAULT_TASK_LENGTH_MS
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        source_file: impl Into<PathBuf>,
        output_folder: impl Into<PathBuf>,
    ) -> Self {
        Self {
            job_id: JobId::new(),
            name: name.into(),
            source_file: source_file.into(),
            output_folder: output_folder.into(),
            streams: Vec::new(),
            task_count: 0,
            task_length_ms: DEFAULT_TASK_LENGTH_MS,
        }
    }

    /// Add a stream to produce.
    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.streams.push(stream);
        self
    }

    /// Set the video task window length.
    pub fn with_task_length_ms(mut self, task_length_ms: u64) -> Self {
        self.task_length_ms = task_length_ms;
        self
    }

    /// Decompose every stream into tasks, numbering them from `task_count`.
    pub fn plan(&mut self) -> ModelResult<Vec<ClientTask>> {
        let mut tasks = Vec::new();
        for stream in self.streams.clone() {
            let created = crate::strategy::create_tasks(self, &stream)?;
            self.task_count += created.len() as u32;
            tasks.extend(created);
        }
        Ok(tasks)
    }
}

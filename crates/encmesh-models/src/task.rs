//! Task definitions.
//!
//! A [`Task`] is the smallest dispatchable unit of encode work. A
//! [`ClientTask`] pairs it with the stream configuration the worker needs to
//! build the encoder invocation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::{ModelError, ModelResult};
use crate::job::JobId;
use crate::progress::Progress;
use crate::stream::StreamConfig;

/// Unit in which a task's work is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Seconds,
    Frames,
}

/// Kind of task, derived from its stream configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Audio,
    Video,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Audio => "audio",
            TaskKind::Video => "video",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cluster-wide identity of a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    pub job_id: JobId,
    pub task_id: u32,
}

impl TaskKey {
    pub fn new(job_id: JobId, task_id: u32) -> Self {
        Self { job_id, task_id }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.job_id, self.task_id)
    }
}

/// A unit of encode work belonging to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task id, unique within the job
    pub task_id: u32,
    /// Owning job
    pub job_id: JobId,
    /// Number of encoder passes
    pub step_count: u32,
    /// Start of the encoded window in the source, in milliseconds
    pub encoding_start_ms: u64,
    /// End of the encoded window in the source, in milliseconds
    pub encoding_end_ms: u64,
    /// Units in one pass
    pub unit_count: u64,
    /// Unit kind
    pub unit: Unit,
    /// Intermediate output, relative to the worker's temp root
    pub temp_file: PathBuf,
    /// Final output, relative to the shared root
    pub final_file: PathBuf,
    /// Progress, owned by the executing worker
    pub progress: Progress,
}

impl Task {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: u32,
        job_id: JobId,
        step_count: u32,
        encoding_start_ms: u64,
        encoding_end_ms: u64,
        unit_count: u64,
        unit: Unit,
        temp_file: impl Into<PathBuf>,
        final_file: impl Into<PathBuf>,
    ) -> Self {
        let step_count = step_count.max(1);
        Self {
            task_id,
            job_id,
            step_count,
            encoding_start_ms,
            encoding_end_ms,
            unit_count,
            unit,
            temp_file: temp_file.into(),
            final_file: final_file.into(),
            progress: Progress::new(step_count, unit_count, unit),
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.job_id.clone(), self.task_id)
    }

    /// Length of the encoded window in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.encoding_end_ms.saturating_sub(self.encoding_start_ms)
    }

    /// Directory holding the task's intermediate files, relative to the
    /// worker's temp root.
    pub fn work_dir(&self) -> PathBuf {
        Path::new(self.job_id.as_str()).join(self.task_id.to_string())
    }

    /// Check a task received from elsewhere before running it.
    ///
    /// The job id must be a single plain path component, both output paths
    /// must be relative without `..`, and the intermediate file must live
    /// inside [`Task::work_dir`].
    pub fn validate(&self) -> ModelResult<()> {
        if self.step_count == 0 {
            return Err(ModelError::invalid_task("step count must be positive"));
        }
        let mut parts = Path::new(self.job_id.as_str()).components();
        if !matches!((parts.next(), parts.next()), (Some(Component::Normal(_)), None)) {
            return Err(ModelError::invalid_task(format!(
                "job id {:?} is not a plain name",
                self.job_id.as_str()
            )));
        }
        for path in [&self.temp_file, &self.final_file] {
            if !is_contained(path) {
                return Err(ModelError::invalid_task(format!(
                    "path {} leaves its root",
                    path.display()
                )));
            }
        }
        let work_dir = self.work_dir();
        if self.temp_file == work_dir || !self.temp_file.starts_with(&work_dir) {
            return Err(ModelError::invalid_task(format!(
                "intermediate file {} is outside {}",
                self.temp_file.display(),
                work_dir.display()
            )));
        }
        Ok(())
    }
}

/// Relative, non-empty and free of `..`.
fn is_contained(path: &Path) -> bool {
    let mut normal = false;
    for component in path.components() {
        match component {
            Component::Normal(_) => normal = true,
            Component::CurDir => {}
            _ => return false,
        }
    }
    normal
}

/// A task as sent to a worker: the task plus its stream encode configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientTask {
    pub task: Task,
    pub stream: StreamConfig,
}

impl ClientTask {
    pub fn new(task: Task, stream: StreamConfig) -> Self {
        Self { task, stream }
    }

    pub fn kind(&self) -> TaskKind {
        self.stream.kind()
    }

    pub fn key(&self) -> TaskKey {
        self.task.key()
    }

    pub fn validate(&self) -> ModelResult<()> {
        self.task.validate()?;
        self.stream.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_key_identity() {
        let task = Task::new(3, JobId::from_string("j1"), 1, 0, 1000, 1, Unit::Seconds, "t", "f");
        assert_eq!(task.key(), TaskKey::new(JobId::from_string("j1"), 3));
        assert_eq!(task.key().to_string(), "j1#3");
    }

    #[test]
    fn test_new_task_progress_matches_task() {
        let task = Task::new(0, JobId::new(), 2, 5_000, 65_000, 1440, Unit::Frames, "t", "f");
        assert_eq!(task.progress.step_count, 2);
        assert_eq!(task.progress.unit_count, 1440);
        assert_eq!(task.progress.current_step, 1);
        assert_eq!(task.duration_ms(), 60_000);
    }

    fn part(job: &str, temp_file: &str, final_file: &str) -> Task {
        Task::new(
            2,
            JobId::from_string(job),
            1,
            0,
            1000,
            1,
            Unit::Seconds,
            temp_file,
            final_file,
        )
    }

    #[test]
    fn test_validate_accepts_planned_layout() {
        let task = part("j1", "j1/2/part-2.ogg", "out/parts/2/part-2.ogg");
        assert!(task.validate().is_ok());
        assert_eq!(task.work_dir(), PathBuf::from("j1/2"));
    }

    #[test]
    fn test_validate_rejects_escaping_paths() {
        let cases = [
            part("../victim", "../victim/2/part-2.ogg", "out/part-2.ogg"),
            part("a/b", "a/b/2/part-2.ogg", "out/part-2.ogg"),
            part("", "2/part-2.ogg", "out/part-2.ogg"),
            part("..", "../2/part-2.ogg", "out/part-2.ogg"),
            part("j1", "/tmp/elsewhere/part-2.ogg", "out/part-2.ogg"),
            part("j1", "j1/2/../../x/part-2.ogg", "out/part-2.ogg"),
            part("j1", "j1/3/part-2.ogg", "out/part-2.ogg"),
            part("j1", "j1/2", "out/part-2.ogg"),
            part("j1", "j1/2/part-2.ogg", "/etc/part-2.ogg"),
            part("j1", "j1/2/part-2.ogg", "out/../../part-2.ogg"),
            part("j1", "j1/2/part-2.ogg", ""),
        ];
        for task in cases {
            assert!(
                matches!(task.validate(), Err(ModelError::InvalidTask(_))),
                "accepted {:?} {:?} {:?}",
                task.job_id.as_str(),
                task.temp_file,
                task.final_file
            );
        }
    }

    #[test]
    fn test_validate_rejects_zero_steps() {
        let mut task = part("j1", "j1/2/part-2.ogg", "out/part-2.ogg");
        task.step_count = 0;
        assert!(task.validate().is_err());
    }
}

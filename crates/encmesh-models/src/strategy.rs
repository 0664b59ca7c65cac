//! Encode strategies: decomposition of a job stream into tasks.
//!
//! Audio streams become a single task covering the whole stream. Video
//! streams are cut into windows of `task_length_ms`.

use std::path::PathBuf;

use crate::error::{ModelError, ModelResult};
use crate::job::Job;
use crate::stream::StreamConfig;
use crate::task::{ClientTask, Task, Unit};

/// Create the tasks for one stream of a job, numbered from `job.task_count`.
pub fn create_tasks(job: &Job, stream: &StreamConfig) -> ModelResult<Vec<ClientTask>> {
    stream.validate()?;
    match stream {
        StreamConfig::Audio(audio) => {
            let duration_ms = audio.source.duration_ms;
            let task_id = job.task_count;
            let task = Task::new(
                task_id,
                job.job_id.clone(),
                1,
                0,
                duration_ms,
                duration_ms.div_ceil(1000),
                Unit::Seconds,
                temp_file(job, task_id, stream),
                final_file(job, task_id, stream),
            );
            Ok(vec![ClientTask::new(task, stream.clone())])
        }
        StreamConfig::Video(video) => {
            if job.task_length_ms == 0 {
                return Err(ModelError::invalid_job("task length must be positive"));
            }
            let duration_ms = video.source.duration_ms;
            let fps = video.source.frame_rate;
            let steps = video.step_count();

            let mut tasks = Vec::new();
            let mut start = 0u64;
            let mut task_id = job.task_count;
            while start < duration_ms {
                let end = (start + job.task_length_ms).min(duration_ms);
                let seconds = (end - start) as f64 / 1000.0;
                let frames = ((seconds * fps).round() as u64).max(1);
                let task = Task::new(
                    task_id,
                    job.job_id.clone(),
                    steps,
                    start,
                    end,
                    frames,
                    Unit::Frames,
                    temp_file(job, task_id, stream),
                    final_file(job, task_id, stream),
                );
                tasks.push(ClientTask::new(task, stream.clone()));
                start = end;
                task_id += 1;
            }
            Ok(tasks)
        }
    }
}

/// `{job_id}/{task_id}/part-{task_id}.{intermediate}`, relative to a worker's temp root.
fn temp_file(job: &Job, task_id: u32, stream: &StreamConfig) -> PathBuf {
    PathBuf::from(job.job_id.as_str())
        .join(task_id.to_string())
        .join(format!("part-{}.{}", task_id, stream.codec().intermediate_container()))
}

/// `{output}/parts/{task_id}/part-{task_id}.{container}`, relative to the shared root.
fn final_file(job: &Job, task_id: u32, stream: &StreamConfig) -> PathBuf {
    job.output_folder
        .join("parts")
        .join(task_id.to_string())
        .join(format!("part-{}.{}", task_id, stream.codec().container()))
}

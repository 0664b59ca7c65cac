//! Task execution supervisor.
//!
//! A [`Converter`] is one pool unit. It runs the encoder passes of a task,
//! publishes the result to the shared root and always removes the task's
//! temporary directory.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use encmesh_media::fs_utils::{
    create_temp_dir, destroy_temp_dir, ensure_parent, give_perms, move_file,
};
use encmesh_media::{
    cancel_pair, CancelWatch, Canceller, FfmpegRunner, MediaError, MediaResult, Platform,
    ProgressParser,
};
use encmesh_models::{Cause, TaskKey};

use crate::inflight::InFlightTask;
use crate::pool::Pooler;
use crate::worker::WorkerEvent;

pub mod args;
pub mod paths;

pub use paths::FilePathManager;

/// Everything converters of one worker share.
#[derive(Debug, Clone)]
pub struct ConverterContext {
    pub ffmpeg_path: PathBuf,
    pub paths: FilePathManager,
    pub platform: Platform,
    pub encode_timeout_secs: Option<u64>,
    /// Worker inbox, used to raise fatal local faults
    pub events: mpsc::UnboundedSender<WorkerEvent>,
}

struct Running {
    key: TaskKey,
    canceller: Canceller,
}

#[derive(Default)]
struct ConverterState {
    running: Option<Running>,
    /// Cancel received before the task registered its canceller
    pending_cancel: Option<TaskKey>,
}

/// Pool unit encoding one task at a time.
pub struct Converter {
    ctx: Arc<ConverterContext>,
    state: Mutex<ConverterState>,
    stopped: AtomicBool,
}

impl Converter {
    pub fn new(ctx: Arc<ConverterContext>) -> Self {
        Self {
            ctx,
            state: Mutex::new(ConverterState::default()),
            stopped: AtomicBool::new(false),
        }
    }

    async fn convert(&self, task: &InFlightTask, cancel: CancelWatch) -> MediaResult<()> {
        let temp_dir = self.ctx.paths.temp_dir(&task.task().task);
        create_temp_dir(&temp_dir).await?;

        let result = self.encode_and_publish(task, cancel).await;

        if let Err(e) = destroy_temp_dir(&temp_dir).await {
            warn!(dir = %temp_dir.display(), error = %e, "Failed to remove task directory");
        }
        result
    }

    async fn encode_and_publish(&self, task: &InFlightTask, cancel: CancelWatch) -> MediaResult<()> {
        let ctask = task.task();
        let mut runner = FfmpegRunner::new(&self.ctx.ffmpeg_path).with_cancel(cancel);
        if let Some(secs) = self.ctx.encode_timeout_secs {
            runner = runner.with_timeout(secs);
        }
        let parser = ProgressParser::new(ctask.task.unit);

        task.progress().write().start();
        for pass in 1..=ctask.task.step_count {
            let cmd = args::pass_command(ctask, pass, &self.ctx.paths, &self.ctx.platform);
            let progress = Arc::clone(task.progress());
            runner
                .run_with_progress(&cmd, parser, move |units| progress.write().update(units))
                .await?;
            let percent = {
                let mut progress = task.progress().write();
                progress.complete_step();
                progress.percent()
            };
            debug!(
                job_id = %ctask.task.job_id,
                task_id = ctask.task.task_id,
                pass,
                steps = ctask.task.step_count,
                percent,
                "Encoder pass finished"
            );
        }

        let codec = ctask.stream.codec();
        let temp_file = self.ctx.paths.temp_file(&ctask.task);
        let final_file = self.ctx.paths.final_file(&ctask.task);

        if codec.needs_transcode() {
            if tokio::fs::try_exists(&final_file).await? {
                return Err(MediaError::OutputExists(final_file));
            }
            ensure_parent(&final_file).await?;
            runner
                .run(&args::transcode_command(codec, &temp_file, &final_file))
                .await?;
        } else {
            move_file(&temp_file, &final_file).await?;
        }
        give_perms(&final_file).await?;
        Ok(())
    }
}

#[async_trait]
impl Pooler<InFlightTask> for Converter {
    async fn process(&self, task: InFlightTask) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            task.progress().write().reset();
            return false;
        }

        let key = task.key();
        let (canceller, watch) = cancel_pair();
        let cancel_now = {
            let mut state = self.state.lock();
            let pending = state.pending_cancel.take();
            state.running = Some(Running {
                key: key.clone(),
                canceller: canceller.clone(),
            });
            pending.as_ref() == Some(&key)
        };
        if cancel_now {
            canceller.cancel().await;
        }

        let result = self.convert(&task, watch).await;
        self.state.lock().running = None;

        match result {
            Ok(()) => {
                task.progress().write().complete();
                true
            }
            Err(e) => {
                task.progress().write().reset();
                match &e {
                    MediaError::Cancelled => {
                        info!(job_id = %key.job_id, task_id = key.task_id, "Task cancelled")
                    }
                    _ => warn!(
                        job_id = %key.job_id,
                        task_id = key.task_id,
                        error = %e,
                        "Task encode failed"
                    ),
                }
                if e.is_fatal() {
                    let _ = self.ctx.events.send(WorkerEvent::Crash(Cause::MissingFfmpeg));
                }
                false
            }
        }
    }

    async fn cancel(&self, task: &InFlightTask) -> bool {
        let key = task.key();
        let canceller = {
            let mut state = self.state.lock();
            match &state.running {
                Some(running) if running.key == key => Some(running.canceller.clone()),
                _ => {
                    state.pending_cancel = Some(key);
                    None
                }
            }
        };
        if let Some(canceller) = canceller {
            canceller.cancel().await;
        }
        true
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let canceller = self
            .state
            .lock()
            .running
            .as_ref()
            .map(|running| running.canceller.clone());
        if let Some(canceller) = canceller {
            canceller.cancel().await;
        }
    }
}

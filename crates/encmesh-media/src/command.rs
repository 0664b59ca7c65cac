//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::CancelWatch;
use crate::error::{MediaError, MediaResult};
use crate::progress::{LineSignal, ProgressParser};

/// Lines of stderr kept for failure reports.
const STDERR_TAIL_LINES: usize = 20;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
    /// Working directory of the process
    working_dir: Option<PathBuf>,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
            working_dir: None,
        }
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set seek position (before input).
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Set duration (before input).
    pub fn duration(self, seconds: f64) -> Self {
        self.input_arg("-t").input_arg(format!("{:.3}", seconds))
    }

    /// Select a single stream of the first input.
    pub fn map_stream(self, index: u32) -> Self {
        self.output_arg("-map").output_arg(format!("0:{}", index))
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Select the pass of a multi-pass encode.
    pub fn pass(self, pass: u32) -> Self {
        self.output_arg("-pass").output_arg(pass.to_string())
    }

    /// Write to the null muxer instead of a real container.
    pub fn discard_output(mut self, null_sink: impl AsRef<Path>) -> Self {
        self.output = null_sink.as_ref().to_path_buf();
        self.output_arg("-f").output_arg("null")
    }

    /// Set whether an existing output may be overwritten.
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Run the process from `dir`, where multi-pass log files are written.
    pub fn working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        args.push(if self.overwrite { "-y" } else { "-n" }.to_string());

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runner for FFmpeg commands with progress parsing and cancellation.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    /// Encoder binary, a name resolved through PATH or a path
    binary: PathBuf,
    /// Cancellation signal
    cancel: Option<CancelWatch>,
    /// Timeout in seconds
    timeout_secs: Option<u64>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegRunner {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            cancel: None,
            timeout_secs: None,
        }
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel: CancelWatch) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Run a command, ignoring its diagnostic stream.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        let _guard = self.cancel.as_ref().map(CancelWatch::enter);
        let mut child = self.spawn(cmd)?;
        self.supervise(&mut child, None, |_| {}).await
    }

    /// Run a command, feeding every progress position to `on_progress`.
    ///
    /// A fatal diagnostic line kills the process and fails with
    /// [`MediaError::MissingCodec`].
    pub async fn run_with_progress<F>(
        &self,
        cmd: &FfmpegCommand,
        parser: ProgressParser,
        on_progress: F,
    ) -> MediaResult<()>
    where
        F: FnMut(u64) + Send,
    {
        let _guard = self.cancel.as_ref().map(CancelWatch::enter);
        let mut child = self.spawn(cmd)?;
        self.supervise(&mut child, Some(parser), on_progress).await
    }

    fn spawn(&self, cmd: &FfmpegCommand) -> MediaResult<Child> {
        if self.cancel.as_ref().is_some_and(CancelWatch::is_cancelled) {
            return Err(MediaError::Cancelled);
        }

        let binary = which::which(&self.binary)
            .map_err(|_| MediaError::FfmpegNotFound(self.binary.clone()))?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: {} {}", binary.display(), args.join(" "));

        let mut command = Command::new(&binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &cmd.working_dir {
            command.current_dir(dir);
        }

        Ok(command.spawn()?)
    }

    async fn supervise<F>(
        &self,
        child: &mut Child,
        parser: Option<ProgressParser>,
        mut on_progress: F,
    ) -> MediaResult<()>
    where
        F: FnMut(u64) + Send,
    {
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("stderr not captured"))?;
        let mut lines = BufReader::new(stderr).lines();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

        let mut cancel = self.cancel.clone();
        let deadline = self
            .timeout_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        match parser.map_or(LineSignal::Ignore, |p| p.parse(&line)) {
                            LineSignal::Progress(units) => on_progress(units),
                            LineSignal::Fatal(cause) => {
                                warn!(?cause, "FFmpeg reported a fatal error, killing process");
                                kill(child).await;
                                return Err(MediaError::missing_codec(line));
                            }
                            LineSignal::Ignore => {
                                if tail.len() == STDERR_TAIL_LINES {
                                    tail.pop_front();
                                }
                                tail.push_back(line);
                            }
                        }
                    }
                    Ok(None) | Err(_) => break,
                },
                _ = wait_cancelled(cancel.as_mut()) => {
                    info!("FFmpeg cancelled, killing process");
                    kill(child).await;
                    return Err(MediaError::Cancelled);
                }
                _ = wait_deadline(deadline) => {
                    let secs = self.timeout_secs.unwrap_or_default();
                    warn!("FFmpeg timed out after {} seconds, killing process", secs);
                    kill(child).await;
                    return Err(MediaError::Timeout(secs));
                }
            }
        }

        let status = child.wait().await?;

        if cancel.as_ref().is_some_and(CancelWatch::is_cancelled) && !status.success() {
            return Err(MediaError::Cancelled);
        }

        if status.success() {
            Ok(())
        } else {
            let stderr = Vec::from(tail).join("\n");
            Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                (!stderr.is_empty()).then_some(stderr),
                status.code(),
            ))
        }
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!("FFmpeg process already gone: {}", e);
    }
}

async fn wait_cancelled(cancel: Option<&mut CancelWatch>) {
    match cancel {
        Some(cancel) => cancel.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg(binary: impl AsRef<Path>) -> MediaResult<PathBuf> {
    let binary = binary.as_ref();
    which::which(binary).map_err(|_| MediaError::FfmpegNotFound(binary.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use encmesh_models::Unit;
    use std::sync::{Arc, Mutex};

    #[cfg(unix)]
    fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("input.mkv", "part-0.mkv")
            .seek(10.0)
            .duration(30.0)
            .map_stream(0)
            .video_codec("libx264")
            .pass(1);

        let args = cmd.build_args();
        let input_pos = args.iter().position(|a| a == "-i").unwrap();
        let seek_pos = args.iter().position(|a| a == "-ss").unwrap();
        assert!(seek_pos < input_pos);
        assert!(args.contains(&"10.000".to_string()));
        assert!(args.contains(&"0:0".to_string()));
        assert_eq!(args.last().unwrap(), "part-0.mkv");
    }

    #[test]
    fn test_discard_output() {
        let args = FfmpegCommand::new("in.mkv", "out.mkv")
            .discard_output("/dev/null")
            .build_args();
        assert_eq!(&args[args.len() - 3..], ["-f", "null", "/dev/null"]);
    }

    #[test]
    fn test_no_overwrite_flag() {
        let args = FfmpegCommand::new("a", "b").overwrite(false).build_args();
        assert_eq!(args[0], "-n");
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let runner = FfmpegRunner::new("/nonexistent/encmesh-ffmpeg");
        let err = runner
            .run(&FfmpegCommand::new("a", "b"))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_progress_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_ffmpeg(
            dir.path(),
            "echo frame=10 >&2\necho frame=20 >&2\necho progress=end >&2\nexit 0",
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        FfmpegRunner::new(bin)
            .run_with_progress(
                &FfmpegCommand::new("in", "out"),
                ProgressParser::new(Unit::Frames),
                move |units| sink.lock().unwrap().push(units),
            )
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![10, 20]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fatal_line_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_ffmpeg(
            dir.path(),
            "echo 'Error while opening encoder for output stream #0:0' >&2\nexec sleep 5",
        );

        let err = FfmpegRunner::new(bin)
            .run_with_progress(
                &FfmpegCommand::new("in", "out"),
                ProgressParser::new(Unit::Frames),
                |_| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::MissingCodec(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_keeps_stderr_tail() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_ffmpeg(dir.path(), "echo 'something broke' >&2\nexit 3");

        let err = FfmpegRunner::new(bin)
            .run(&FfmpegCommand::new("in", "out"))
            .await
            .unwrap_err();
        match err {
            MediaError::FfmpegFailed {
                stderr, exit_code, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert!(stderr.unwrap().contains("something broke"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_ffmpeg(dir.path(), "echo frame=1 >&2\nexec sleep 30");

        let (canceller, watch) = cancel_pair();
        let runner = FfmpegRunner::new(bin).with_cancel(watch);
        let handle = tokio::spawn(async move {
            runner
                .run_with_progress(
                    &FfmpegCommand::new("in", "out"),
                    ProgressParser::new(Unit::Frames),
                    |_| {},
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::time::timeout(Duration::from_secs(5), canceller.cancel())
            .await
            .unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(MediaError::Cancelled)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_runner_does_not_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let bin = fake_ffmpeg(dir.path(), &format!("touch {}", marker.display()));

        let (canceller, watch) = cancel_pair();
        canceller.cancel().await;

        let err = FfmpegRunner::new(bin)
            .with_cancel(watch)
            .run(&FfmpegCommand::new("in", "out"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Cancelled));
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_ffmpeg(dir.path(), "exec sleep 30");

        let err = FfmpegRunner::new(bin)
            .with_timeout(1)
            .run(&FfmpegCommand::new("in", "out"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Timeout(1)));
    }
}

//! FFmpeg CLI wrapper for encode task execution.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - A runner with cancellation, timeout and diagnostic-stream parsing
//! - A pure progress/error line parser
//! - Filesystem helpers (cross-device moves, permissions, temp dirs)
//! - Platform and encoder capability detection

pub mod cancel;
pub mod capabilities;
pub mod command;
pub mod error;
pub mod fs_utils;
pub mod platform;
pub mod progress;

pub use cancel::{cancel_pair, CancelWatch, Canceller};
pub use capabilities::{detect_encoders, parse_encoder_list};
pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use platform::Platform;
pub use progress::{FatalCause, LineSignal, ProgressParser};

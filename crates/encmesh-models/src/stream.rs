//! Stream encode configurations.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::codec::Codec;
use crate::error::{ModelError, ModelResult};
use crate::task::TaskKind;

/// A stream of the source file, as probed by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStream {
    /// Stream index inside the source container
    pub index: u32,
    /// Stream duration in milliseconds
    pub duration_ms: u64,
    /// Frames per second (0 for audio)
    #[serde(default)]
    pub frame_rate: f64,
}

/// Rate control of an encode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RateControl {
    /// Target bitrate in kbit/s
    Vbr { kbps: u32 },
    /// Constant quality
    Crf { quality: f32 },
}

/// Channel layout of an audio output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelDisposition {
    #[default]
    Original,
    Mono,
    Stereo,
}

impl ChannelDisposition {
    pub fn channel_count(&self) -> Option<u32> {
        match self {
            ChannelDisposition::Original => None,
            ChannelDisposition::Mono => Some(1),
            ChannelDisposition::Stereo => Some(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioStreamConfig {
    pub source_file: PathBuf,
    pub source: SourceStream,
    pub codec: Codec,
    pub rate_control: RateControl,
    #[serde(default)]
    pub channels: ChannelDisposition,
    /// Output sample rate in Hz, source rate when absent
    #[serde(default)]
    pub sample_rate: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoStreamConfig {
    pub source_file: PathBuf,
    pub source: SourceStream,
    pub codec: Codec,
    pub rate_control: RateControl,
    /// Requested encoder passes (1 or 2)
    #[serde(default = "default_passes")]
    pub passes: u32,
}

fn default_passes() -> u32 {
    1
}

impl VideoStreamConfig {
    /// Effective pass count: two passes only make sense with a bitrate target.
    pub fn step_count(&self) -> u32 {
        match self.rate_control {
            RateControl::Vbr { .. } => self.passes.clamp(1, 2),
            RateControl::Crf { .. } => 1,
        }
    }
}

/// Encode configuration of one output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamConfig {
    Audio(AudioStreamConfig),
    Video(VideoStreamConfig),
}

impl StreamConfig {
    pub fn kind(&self) -> TaskKind {
        match self {
            StreamConfig::Audio(_) => TaskKind::Audio,
            StreamConfig::Video(_) => TaskKind::Video,
        }
    }

    pub fn codec(&self) -> Codec {
        match self {
            StreamConfig::Audio(a) => a.codec,
            StreamConfig::Video(v) => v.codec,
        }
    }

    pub fn source(&self) -> &SourceStream {
        match self {
            StreamConfig::Audio(a) => &a.source,
            StreamConfig::Video(v) => &v.source,
        }
    }

    pub fn source_file(&self) -> &PathBuf {
        match self {
            StreamConfig::Audio(a) => &a.source_file,
            StreamConfig::Video(v) => &v.source_file,
        }
    }

    pub fn rate_control(&self) -> RateControl {
        match self {
            StreamConfig::Audio(a) => a.rate_control,
            StreamConfig::Video(v) => v.rate_control,
        }
    }

    /// Rate-control arguments; empty for lossless codecs.
    pub fn rate_control_args(&self) -> Vec<String> {
        let codec = self.codec();
        if codec.is_lossless() {
            return Vec::new();
        }
        match self.rate_control() {
            RateControl::Vbr { kbps } => {
                vec![codec.vbr_switch().to_string(), codec.format_bitrate(kbps)]
            }
            RateControl::Crf { quality } => {
                vec![codec.crf_switch().to_string(), codec.format_quality(quality)]
            }
        }
    }

    /// Check the configuration can be turned into tasks.
    pub fn validate(&self) -> ModelResult<()> {
        let codec = self.codec();
        if codec.kind() != self.kind() {
            return Err(ModelError::CodecMismatch {
                codec: codec.as_str(),
                expected: self.kind().as_str(),
            });
        }
        if self.source().duration_ms == 0 {
            return Err(ModelError::invalid_stream("source stream has no duration"));
        }
        if let RateControl::Vbr { kbps: 0 } = self.rate_control() {
            return Err(ModelError::invalid_stream("bitrate must be positive"));
        }
        if let StreamConfig::Video(v) = self {
            if !(v.source.frame_rate.is_finite() && v.source.frame_rate > 0.0) {
                return Err(ModelError::invalid_stream("video stream needs a frame rate"));
            }
        }
        Ok(())
    }
}

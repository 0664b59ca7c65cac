//! Codecs understood by the encode supervisor.
//!
//! Only the properties the worker needs to build an encoder invocation are
//! modelled here: encoder library, containers, rate-control switches.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::task::TaskKind;

/// Output codec of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    H264,
    H265,
    Vp8,
    Vp9,
    Theora,
    Aac,
    Vorbis,
    Opus,
    Flac,
    Mp3,
}

/// Whether a codec produces audio or video.
pub type CodecKind = TaskKind;

impl Codec {
    pub const ALL: [Codec; 10] = [
        Codec::H264,
        Codec::H265,
        Codec::Vp8,
        Codec::Vp9,
        Codec::Theora,
        Codec::Aac,
        Codec::Vorbis,
        Codec::Opus,
        Codec::Flac,
        Codec::Mp3,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::H264 => "h264",
            Codec::H265 => "h265",
            Codec::Vp8 => "vp8",
            Codec::Vp9 => "vp9",
            Codec::Theora => "theora",
            Codec::Aac => "aac",
            Codec::Vorbis => "vorbis",
            Codec::Opus => "opus",
            Codec::Flac => "flac",
            Codec::Mp3 => "mp3",
        }
    }

    /// ffmpeg encoder library name.
    pub fn encoder(&self) -> &'static str {
        match self {
            Codec::H264 => "libx264",
            Codec::H265 => "libx265",
            Codec::Vp8 => "libvpx",
            Codec::Vp9 => "libvpx-vp9",
            Codec::Theora => "libtheora",
            Codec::Aac => "aac",
            Codec::Vorbis => "libvorbis",
            Codec::Opus => "libopus",
            Codec::Flac => "flac",
            Codec::Mp3 => "libmp3lame",
        }
    }

    /// Map an ffmpeg encoder name back to a codec.
    pub fn from_encoder(name: &str) -> Option<Codec> {
        Codec::ALL.into_iter().find(|c| c.encoder() == name)
    }

    pub fn kind(&self) -> CodecKind {
        match self {
            Codec::H264 | Codec::H265 | Codec::Vp8 | Codec::Vp9 | Codec::Theora => TaskKind::Video,
            _ => TaskKind::Audio,
        }
    }

    /// Extension of the final part file.
    pub fn container(&self) -> &'static str {
        match self {
            Codec::H264 => "ts",
            Codec::H265 => "mkv",
            Codec::Vp8 | Codec::Vp9 => "webm",
            Codec::Theora | Codec::Vorbis => "ogg",
            Codec::Aac => "m4a",
            Codec::Opus => "opus",
            Codec::Flac => "flac",
            Codec::Mp3 => "mp3",
        }
    }

    /// Extension of the encoder's direct output.
    pub fn intermediate_container(&self) -> &'static str {
        match self {
            Codec::H264 => "mkv",
            other => other.container(),
        }
    }

    pub fn is_lossless(&self) -> bool {
        matches!(self, Codec::Flac)
    }

    /// Whether the encoder output must be remuxed into the final container.
    pub fn needs_transcode(&self) -> bool {
        self.intermediate_container() != self.container()
    }

    /// Output arguments of the stream-copy remux into the final container.
    pub fn transcode_args(&self) -> Vec<String> {
        match self {
            Codec::H264 => vec![
                "-f".into(),
                "mpegts".into(),
                "-c".into(),
                "copy".into(),
                "-bsf:v".into(),
                "h264_mp4toannexb".into(),
            ],
            _ => vec!["-c".into(), "copy".into()],
        }
    }

    /// Switch selecting a target bitrate.
    pub fn vbr_switch(&self) -> &'static str {
        match self.kind() {
            TaskKind::Video => "-b:v",
            TaskKind::Audio => "-b:a",
        }
    }

    /// Switch selecting a constant quality.
    pub fn crf_switch(&self) -> &'static str {
        match self {
            Codec::H264 | Codec::H265 | Codec::Vp8 | Codec::Vp9 => "-crf",
            Codec::Theora => "-q:v",
            _ => "-q:a",
        }
    }

    pub fn format_bitrate(&self, kbps: u32) -> String {
        format!("{}k", kbps)
    }

    pub fn format_quality(&self, quality: f32) -> String {
        if quality.fract() == 0.0 {
            format!("{}", quality as i64)
        } else {
            format!("{:.1}", quality)
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_h264_needs_mpegts_remux() {
        assert!(Codec::H264.needs_transcode());
        assert_eq!(Codec::H264.intermediate_container(), "mkv");
        assert_eq!(Codec::H264.container(), "ts");
        assert!(Codec::H264.transcode_args().contains(&"h264_mp4toannexb".to_string()));
    }

    #[test]
    fn test_audio_codecs_do_not_remux() {
        for codec in [Codec::Aac, Codec::Vorbis, Codec::Opus, Codec::Flac, Codec::Mp3] {
            assert!(!codec.needs_transcode(), "{codec}");
            assert_eq!(codec.kind(), TaskKind::Audio);
        }
    }

    #[test]
    fn test_from_encoder() {
        assert_eq!(Codec::from_encoder("libx264"), Some(Codec::H264));
        assert_eq!(Codec::from_encoder("libvorbis"), Some(Codec::Vorbis));
        assert_eq!(Codec::from_encoder("nope"), None);
    }

    #[test]
    fn test_rate_control_formatting() {
        assert_eq!(Codec::H264.vbr_switch(), "-b:v");
        assert_eq!(Codec::Vorbis.vbr_switch(), "-b:a");
        assert_eq!(Codec::H264.format_bitrate(2500), "2500k");
        assert_eq!(Codec::H264.format_quality(23.0), "23");
        assert_eq!(Codec::Vorbis.format_quality(4.5), "4.5");
    }

    #[test]
    fn test_only_flac_is_lossless() {
        let lossless: Vec<_> = Codec::ALL.into_iter().filter(Codec::is_lossless).collect();
        assert_eq!(lossless, vec![Codec::Flac]);
    }
}

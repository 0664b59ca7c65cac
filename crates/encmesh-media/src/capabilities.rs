//! Encoder capability discovery.

use std::path::Path;
use tokio::process::Command;
use tracing::warn;

use encmesh_models::Codec;

use crate::error::{MediaError, MediaResult};

/// List the codecs the local ffmpeg build can encode.
///
/// Runs `ffmpeg -hide_banner -encoders` and keeps the encoders that map to a
/// known [`Codec`].
pub async fn detect_encoders(binary: impl AsRef<Path>) -> MediaResult<Vec<Codec>> {
    let binary = binary.as_ref();
    let resolved =
        which::which(binary).map_err(|_| MediaError::FfmpegNotFound(binary.to_path_buf()))?;

    let out = Command::new(resolved)
        .arg("-hide_banner")
        .arg("-encoders")
        .output()
        .await?;

    if !out.status.success() {
        warn!(exit_code = ?out.status.code(), "Encoder listing failed");
        return Ok(Vec::new());
    }

    Ok(parse_encoder_list(&String::from_utf8_lossy(&out.stdout)))
}

/// Parse the output of `ffmpeg -encoders`.
///
/// Lines look like ` V....D libx264   libx264 H.264 / AVC ...`; the second
/// column is the encoder name.
pub fn parse_encoder_list(text: &str) -> Vec<Codec> {
    let mut codecs: Vec<Codec> = text
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(Codec::from_encoder)
        .collect();
    codecs.sort();
    codecs.dedup();
    codecs
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
Encoders:
 V..... = Video
 A..... = Audio
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC (codec h264)
 V....D libvpx-vp9           libvpx VP9 (codec vp9)
 V....D mpeg4                MPEG-4 part 2
 A....D aac                  AAC (Advanced Audio Coding)
 A....D libvorbis            libvorbis (codec vorbis)
 A....D flac                 FLAC (Free Lossless Audio Codec)
";

    #[test]
    fn test_parse_encoder_list() {
        let codecs = parse_encoder_list(LISTING);
        assert_eq!(
            codecs,
            vec![Codec::H264, Codec::Vp9, Codec::Aac, Codec::Vorbis, Codec::Flac]
        );
    }

    #[test]
    fn test_parse_empty_listing() {
        assert!(parse_encoder_list("").is_empty());
    }

    #[tokio::test]
    async fn test_detect_without_binary() {
        let err = detect_encoders("/nonexistent/encmesh-ffmpeg").await.unwrap_err();
        assert!(matches!(err, MediaError::FfmpegNotFound(_)));
    }
}

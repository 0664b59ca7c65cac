//! Encoder invocations of a task.

use std::path::Path;

use encmesh_media::{FfmpegCommand, Platform};
use encmesh_models::{ClientTask, Codec, StreamConfig};

use super::paths::FilePathManager;

fn ms_to_secs(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

/// Invocation of pass `pass` (1-based) of a task.
///
/// Single-pass encodes carry no multi-pass arguments. Every pass but the last
/// writes to the platform null sink.
pub fn pass_command(
    ctask: &ClientTask,
    pass: u32,
    paths: &FilePathManager,
    platform: &Platform,
) -> FfmpegCommand {
    let task = &ctask.task;
    let stream = &ctask.stream;
    let source = paths.source_file(stream.source_file());

    let mut cmd = FfmpegCommand::new(&source, paths.temp_file(task))
        .seek(ms_to_secs(task.encoding_start_ms))
        .duration(ms_to_secs(task.duration_ms()))
        .working_dir(paths.temp_dir(task));

    cmd = match stream {
        StreamConfig::Video(video) => cmd
            .output_args(["-sn", "-an", "-force_key_frames", "0"])
            .map_stream(video.source.index)
            .video_codec(video.codec.encoder()),
        StreamConfig::Audio(audio) => {
            let mut cmd = cmd
                .output_args(["-vn", "-sn"])
                .map_stream(audio.source.index)
                .audio_codec(audio.codec.encoder());
            if let Some(channels) = audio.channels.channel_count() {
                cmd = cmd.output_arg("-ac").output_arg(channels.to_string());
            }
            if let Some(rate) = audio.sample_rate {
                cmd = cmd.output_arg("-ar").output_arg(rate.to_string());
            }
            cmd
        }
    };
    cmd = cmd.output_args(stream.rate_control_args());

    if task.step_count > 1 {
        cmd = cmd.pass(pass);
        if pass < task.step_count {
            cmd = cmd.discard_output(platform.null_sink());
        }
    }
    cmd
}

/// Stream-copy remux of the encoder output into the final container.
///
/// Never overwrites `final_file`.
pub fn transcode_command(codec: Codec, temp_file: &Path, final_file: &Path) -> FfmpegCommand {
    FfmpegCommand::new(temp_file, final_file)
        .overwrite(false)
        .output_args(codec.transcode_args())
}

#[cfg(test)]
mod tests {
    use super::*;
    use encmesh_models::{
        AudioStreamConfig, ChannelDisposition, JobId, RateControl, SourceStream, Task, Unit,
        VideoStreamConfig,
    };

    fn paths() -> FilePathManager {
        FilePathManager::new("/tmp/enc", "/srv/shared")
    }

    fn video_task(passes: u32) -> ClientTask {
        let stream = StreamConfig::Video(VideoStreamConfig {
            source_file: "in.mkv".into(),
            source: SourceStream {
                index: 0,
                duration_ms: 120_000,
                frame_rate: 24.0,
            },
            codec: Codec::H264,
            rate_control: RateControl::Vbr { kbps: 2500 },
            passes,
        });
        let task = Task::new(
            1,
            JobId::from_string("j"),
            passes,
            60_000,
            120_000,
            1440,
            Unit::Frames,
            "j/1/part-1.mkv",
            "out/parts/1/part-1.ts",
        );
        ClientTask::new(task, stream)
    }

    fn pair(args: &[String], flag: &str) -> Option<String> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1).cloned())
    }

    #[test]
    fn test_single_pass_has_no_pass_args() {
        let args = pass_command(&video_task(1), 1, &paths(), &Platform::unix()).build_args();

        assert!(!args.contains(&"-pass".to_string()));
        assert_eq!(pair(&args, "-ss").as_deref(), Some("60.000"));
        assert_eq!(pair(&args, "-t").as_deref(), Some("60.000"));
        assert_eq!(pair(&args, "-i").as_deref(), Some("/srv/shared/in.mkv"));
        assert_eq!(pair(&args, "-map").as_deref(), Some("0:0"));
        assert_eq!(pair(&args, "-c:v").as_deref(), Some("libx264"));
        assert_eq!(pair(&args, "-b:v").as_deref(), Some("2500k"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/enc/j/1/part-1.mkv"));
    }

    #[test]
    fn test_first_of_two_passes_discards_output() {
        let args = pass_command(&video_task(2), 1, &paths(), &Platform::unix()).build_args();

        assert_eq!(pair(&args, "-pass").as_deref(), Some("1"));
        assert_eq!(pair(&args, "-f").as_deref(), Some("null"));
        assert_eq!(args.last().map(String::as_str), Some("/dev/null"));
    }

    #[test]
    fn test_final_pass_writes_temp_file() {
        let args = pass_command(&video_task(2), 2, &paths(), &Platform::unix()).build_args();

        assert_eq!(pair(&args, "-pass").as_deref(), Some("2"));
        assert!(!args.contains(&"null".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/enc/j/1/part-1.mkv"));
    }

    #[test]
    fn test_audio_channels_and_rate() {
        let stream = StreamConfig::Audio(AudioStreamConfig {
            source_file: "/media/in.mkv".into(),
            source: SourceStream {
                index: 2,
                duration_ms: 120_000,
                frame_rate: 0.0,
            },
            codec: Codec::Opus,
            rate_control: RateControl::Vbr { kbps: 96 },
            channels: ChannelDisposition::Stereo,
            sample_rate: Some(48_000),
        });
        let task = Task::new(
            0,
            JobId::from_string("j"),
            1,
            0,
            120_000,
            120,
            Unit::Seconds,
            "j/0/part-0.opus",
            "out/parts/0/part-0.opus",
        );
        let args = pass_command(&ClientTask::new(task, stream), 1, &paths(), &Platform::unix())
            .build_args();

        assert!(args.contains(&"-vn".to_string()));
        assert_eq!(pair(&args, "-i").as_deref(), Some("/media/in.mkv"));
        assert_eq!(pair(&args, "-map").as_deref(), Some("0:2"));
        assert_eq!(pair(&args, "-c:a").as_deref(), Some("libopus"));
        assert_eq!(pair(&args, "-ac").as_deref(), Some("2"));
        assert_eq!(pair(&args, "-ar").as_deref(), Some("48000"));
        assert_eq!(pair(&args, "-b:a").as_deref(), Some("96k"));
    }

    #[test]
    fn test_transcode_never_overwrites() {
        let args = transcode_command(
            Codec::H264,
            Path::new("/tmp/enc/j/1/part-1.mkv"),
            Path::new("/srv/shared/out/parts/1/part-1.ts"),
        )
        .build_args();

        assert_eq!(args.first().map(String::as_str), Some("-n"));
        assert_eq!(pair(&args, "-f").as_deref(), Some("mpegts"));
        assert_eq!(pair(&args, "-c").as_deref(), Some("copy"));
    }
}

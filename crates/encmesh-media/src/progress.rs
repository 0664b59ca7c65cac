//! FFmpeg diagnostic-stream parsing.
//!
//! The encoder's stderr is the only progress and error channel. Each line is
//! classified independently by [`ProgressParser::parse`]; the parser keeps no
//! state between lines.

use regex::Regex;
use std::sync::LazyLock;

use encmesh_models::Unit;

static FRAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"frame=\s*(\d+)").expect("valid frame pattern"));

static OUT_TIME_US: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"out_time_us=(\d+)").expect("valid out_time_us pattern"));

/// Matches both `out_time=HH:MM:SS.ffffff` and the classic stats `time=HH:MM:SS.ff`.
static CLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("valid time pattern")
});

const FATAL_ENCODER: &[&str] = &[
    "Error while opening encoder for output stream",
    "Unknown encoder",
    "Encoder not found",
];

static FATAL_DECODER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Decoder \(codec [^)]*\) not found|Unknown decoder")
        .expect("valid decoder pattern")
});

/// Why the encoder cannot continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalCause {
    EncoderUnavailable,
    DecoderUnavailable,
}

/// Classification of one diagnostic line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSignal {
    /// Unit position reached by the encoder
    Progress(u64),
    /// The encode cannot succeed
    Fatal(FatalCause),
    Ignore,
}

/// Classifies encoder lines for a task counted in `unit`.
#[derive(Debug, Clone, Copy)]
pub struct ProgressParser {
    unit: Unit,
}

impl ProgressParser {
    pub fn new(unit: Unit) -> Self {
        Self { unit }
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn parse(&self, line: &str) -> LineSignal {
        let line = line.trim();
        if line.is_empty() {
            return LineSignal::Ignore;
        }

        if FATAL_ENCODER.iter().any(|p| line.contains(p)) {
            return LineSignal::Fatal(FatalCause::EncoderUnavailable);
        }
        if FATAL_DECODER.is_match(line) {
            return LineSignal::Fatal(FatalCause::DecoderUnavailable);
        }

        let units = match self.unit {
            Unit::Frames => parse_frame(line),
            Unit::Seconds => parse_seconds(line),
        };
        units.map_or(LineSignal::Ignore, LineSignal::Progress)
    }
}

fn parse_frame(line: &str) -> Option<u64> {
    FRAME.captures(line)?.get(1)?.as_str().parse().ok()
}

fn parse_seconds(line: &str) -> Option<u64> {
    if let Some(caps) = OUT_TIME_US.captures(line) {
        let us: u64 = caps.get(1)?.as_str().parse().ok()?;
        return Some(us / 1_000_000);
    }

    let caps = CLOCK.captures(line)?;
    let hours: u64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: u64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    hours
        .checked_mul(3600)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds.floor() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_from_progress_pipe() {
        let parser = ProgressParser::new(Unit::Frames);
        assert_eq!(parser.parse("frame=120"), LineSignal::Progress(120));
        assert_eq!(parser.parse("fps=48.00"), LineSignal::Ignore);
        assert_eq!(parser.parse("progress=continue"), LineSignal::Ignore);
    }

    #[test]
    fn test_frames_from_classic_stats_line() {
        let parser = ProgressParser::new(Unit::Frames);
        let line = "frame=  123 fps= 45 q=28.0 size=     512kB time=00:00:05.12 bitrate= 819.2kbits/s";
        assert_eq!(parser.parse(line), LineSignal::Progress(123));
    }

    #[test]
    fn test_seconds_from_out_time_us() {
        let parser = ProgressParser::new(Unit::Seconds);
        assert_eq!(parser.parse("out_time_us=65500000"), LineSignal::Progress(65));
    }

    #[test]
    fn test_seconds_from_clock() {
        let parser = ProgressParser::new(Unit::Seconds);
        assert_eq!(
            parser.parse("out_time=00:02:00.000000"),
            LineSignal::Progress(120)
        );
        assert_eq!(
            parser.parse("size=  100kB time=01:00:01.50 bitrate=128.0kbits/s"),
            LineSignal::Progress(3601)
        );
    }

    #[test]
    fn test_negative_clock_is_ignored() {
        let parser = ProgressParser::new(Unit::Seconds);
        assert_eq!(parser.parse("out_time=-577014:32:22.771719"), LineSignal::Ignore);
    }

    #[test]
    fn test_oversized_clock_is_ignored() {
        let parser = ProgressParser::new(Unit::Seconds);
        assert_eq!(
            parser.parse("out_time=6000000000000000:00:00.000000"),
            LineSignal::Ignore
        );
    }

    #[test]
    fn test_fatal_lines() {
        let parser = ProgressParser::new(Unit::Frames);
        assert_eq!(
            parser.parse("Error while opening encoder for output stream #0:0 - maybe incorrect parameters"),
            LineSignal::Fatal(FatalCause::EncoderUnavailable)
        );
        assert_eq!(
            parser.parse("Unknown encoder 'libfoo'"),
            LineSignal::Fatal(FatalCause::EncoderUnavailable)
        );
        assert_eq!(
            parser.parse("Decoder (codec hevc) not found for input stream #0:0"),
            LineSignal::Fatal(FatalCause::DecoderUnavailable)
        );
    }

    #[test]
    fn test_unit_mismatch_is_ignored() {
        let parser = ProgressParser::new(Unit::Seconds);
        assert_eq!(parser.parse("frame=50"), LineSignal::Ignore);
    }
}

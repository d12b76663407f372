//! Source probing with ffprobe
//!
//! Frame rate and duration are read as single textual values. A missing or
//! malformed value is a probe failure and is recovered with a default.

use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Frame rate used when the source cannot be probed
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Error types for ffprobe invocations
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run ffprobe: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("ffprobe exited with {0}")]
    Failed(std::process::ExitStatus),

    #[error("malformed probe value: {0:?}")]
    Malformed(String),
}

/// Parse "num/den" or a plain decimal into a rate
///
/// A zero denominator or a non-finite value is rejected.
pub fn parse_rational(value: &str) -> Option<f64> {
    let value = value.trim();
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => value.parse().ok()?,
    };
    rate.is_finite().then_some(rate)
}

/// Snap a measured frame rate to the nominal rate editors expect
///
/// Half-open bands are tried in order: (23,25) to 24, (24,26) to 25,
/// (29,31) to 30, (59,61) to 60. Anything else rounds to the nearest integer.
pub fn snap_frame_rate(fps: f64) -> u32 {
    if fps > 23.0 && fps < 25.0 {
        24
    } else if fps > 24.0 && fps < 26.0 {
        25
    } else if fps > 29.0 && fps < 31.0 {
        30
    } else if fps > 59.0 && fps < 61.0 {
        60
    } else {
        fps.max(0.0).round() as u32
    }
}

fn ffprobe_command(ffprobe: &Path, entries: &str, video_stream: bool, file: &Path) -> Command {
    let mut cmd = Command::new(ffprobe);
    cmd.args(["-v", "error"]);
    if video_stream {
        cmd.args(["-select_streams", "v:0"]);
    }
    cmd.args([
        "-show_entries",
        entries,
        "-of",
        "default=noprint_wrappers=1:nokey=1",
    ]);
    cmd.arg(file);
    cmd
}

/// Command printing the first video stream's `r_frame_rate`
pub fn frame_rate_command(ffprobe: &Path, file: &Path) -> Command {
    ffprobe_command(ffprobe, "stream=r_frame_rate", true, file)
}

/// Command printing the container duration in seconds
pub fn duration_command(ffprobe: &Path, file: &Path) -> Command {
    ffprobe_command(ffprobe, "format=duration", false, file)
}

/// Run a probe command and return its first non-empty output line
pub fn run_probe(mut cmd: Command) -> Result<String, ProbeError> {
    let output = cmd.output()?;
    if !output.status.success() {
        return Err(ProbeError::Failed(output.status));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
        .to_string())
}

/// Parse the frame-rate probe output, rejecting non-positive rates
pub fn parse_frame_rate_output(value: &str) -> Result<f64, ProbeError> {
    parse_rational(value)
        .filter(|rate| *rate > 0.0)
        .ok_or_else(|| ProbeError::Malformed(value.to_string()))
}

/// Parse the duration probe output, rejecting negative durations
pub fn parse_duration_output(value: &str) -> Result<f64, ProbeError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| ProbeError::Malformed(value.to_string()))
}

/// Snapped frame rate from a probe command, or 30 on failure
pub fn frame_rate_from(cmd: Command) -> u32 {
    match run_probe(cmd).and_then(|value| parse_frame_rate_output(&value)) {
        Ok(rate) => snap_frame_rate(rate),
        Err(e) => {
            tracing::warn!(error = %e, "frame rate probe failed, using {}", DEFAULT_FRAME_RATE);
            DEFAULT_FRAME_RATE
        }
    }
}

/// Duration in seconds from a probe command, or 0 (unknown) on failure
pub fn duration_from(cmd: Command) -> f64 {
    match run_probe(cmd).and_then(|value| parse_duration_output(&value)) {
        Ok(duration) => duration,
        Err(e) => {
            tracing::warn!(error = %e, "duration probe failed, progress will not be reported");
            0.0
        }
    }
}

/// Probe and snap the frame rate of `file`
pub fn probe_frame_rate(ffprobe: &Path, file: &Path) -> u32 {
    frame_rate_from(frame_rate_command(ffprobe, file))
}

/// Probe the duration of `file` in seconds
pub fn probe_duration(ffprobe: &Path, file: &Path) -> f64 {
    duration_from(duration_command(ffprobe, file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        // Total: every non-negative input lands on a standard rate or its rounding.
        #[test]
        fn prop_snap_total(fps in 0.0f64..240.0) {
            let snapped = snap_frame_rate(fps);
            prop_assert!([24, 25, 30, 60, fps.round() as u32].contains(&snapped));
        }

        #[test]
        fn prop_snap_idempotent(fps in 0.0f64..240.0) {
            let once = snap_frame_rate(fps);
            prop_assert_eq!(snap_frame_rate(once as f64), once);
        }

        #[test]
        fn prop_rational_matches_division(num in 1u32..200_000, den in 1u32..10_000) {
            let parsed = parse_rational(&format!("{}/{}", num, den)).unwrap();
            prop_assert!((parsed - num as f64 / den as f64).abs() < 1e-9);
        }
    }

    #[test]
    fn test_standard_rates_map_to_themselves() {
        for rate in [24u32, 25, 30, 60] {
            assert_eq!(snap_frame_rate(rate as f64), rate);
        }
    }

    #[test]
    fn test_broadcast_rates() {
        assert_eq!(snap_frame_rate(parse_rational("30000/1001").unwrap()), 30);
        assert_eq!(snap_frame_rate(parse_rational("24000/1001").unwrap()), 24);
        assert_eq!(snap_frame_rate(parse_rational("60000/1001").unwrap()), 60);
        assert_eq!(snap_frame_rate(parse_rational("25/1").unwrap()), 25);
        assert_eq!(snap_frame_rate(50.0), 50);
        assert_eq!(snap_frame_rate(12.4), 12);
    }

    #[test]
    fn test_parse_rational_rejects() {
        assert_eq!(parse_rational("30/0"), None);
        assert_eq!(parse_rational("N/A"), None);
        assert_eq!(parse_rational(""), None);
        assert_eq!(parse_rational("29.97"), Some(29.97));
    }

    #[test]
    fn test_zero_rate_is_probe_failure() {
        assert!(parse_frame_rate_output("0/0").is_err());
        assert!(parse_frame_rate_output("0/1").is_err());
        assert!(parse_duration_output("N/A").is_err());
        assert_eq!(parse_duration_output("212.345000").unwrap(), 212.345);
    }

    #[test]
    fn test_missing_ffprobe_uses_defaults() {
        let ffprobe = Path::new("/nonexistent/cutready/ffprobe");
        let file = Path::new("/nonexistent/video.mkv");
        assert_eq!(probe_frame_rate(ffprobe, file), DEFAULT_FRAME_RATE);
        assert_eq!(probe_duration(ffprobe, file), 0.0);
    }

    #[test]
    fn test_command_shape() {
        let cmd = frame_rate_command(Path::new("ffprobe"), Path::new("in.mkv"));
        let args: Vec<String> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=r_frame_rate",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
                "in.mkv"
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_probe_output_parsed() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo 30000/1001"]);
        assert_eq!(frame_rate_from(cmd), 30);

        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo 125.5"]);
        assert_eq!(duration_from(cmd), 125.5);

        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo 1.0; exit 1"]);
        assert_eq!(duration_from(cmd), 0.0);
    }
}

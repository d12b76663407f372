//! FFmpeg transcode commands and progress scraping
//!
//! Builds the CFR H.264 and ProRes 422 argument vectors, runs ffmpeg, and
//! turns its `time=` status lines into percentages against a probed
//! duration.

use super::probe::{probe_duration, probe_frame_rate};
use crate::capability::EncoderCapability;
use crate::config::EncodeConfig;
use crate::context::EngineContext;
use crate::diagnose;
use crate::process::{for_each_line, join_tail, spawn_tail_reader, LineTail};
use regex::Regex;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use thiserror::Error;

/// Highest percentage reported while ffmpeg is still running
pub const MAX_RUNNING_PERCENT: f64 = 99.0;

/// Error types for transcoding
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to run ffmpeg: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("ffmpeg failed (exit code {code:?}): {tail}")]
    Failed { code: Option<i32>, tail: String },
}

impl EncodeError {
    pub fn is_resource_lock(&self) -> bool {
        match self {
            EncodeError::Failed { tail, .. } => diagnose::classify(tail).is_resource_lock(),
            EncodeError::Spawn(_) => false,
        }
    }
}

/// Output profile of a transcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeProfile {
    /// Constant frame rate H.264 in MP4
    H264Cfr,
    /// ProRes 422 Standard in MOV
    Prores,
}

impl EncodeProfile {
    /// Suffix and extension appended to the sanitized title
    pub fn output_suffix(&self) -> &'static str {
        match self {
            EncodeProfile::H264Cfr => "_CFR.mp4",
            EncodeProfile::Prores => "_ProRes.mov",
        }
    }
}

/// Build the CFR H.264 command for the given encoder back-end
pub fn build_h264_cfr_command(
    ffmpeg: &Path,
    input: &Path,
    output: &Path,
    fps: u32,
    capability: EncoderCapability,
    cfg: &EncodeConfig,
) -> Command {
    let mut cmd = Command::new(ffmpeg);
    cmd.arg("-i").arg(input);

    let quality = cfg.quality.to_string();
    let quality = quality.as_str();
    let fps = fps.to_string();
    let sample_rate = cfg.sample_rate.to_string();

    cmd.args(["-c:v", capability.encoder_name()]);
    match capability {
        EncoderCapability::Nvenc => {
            cmd.args(["-preset", "slow", "-cq", quality]);
        }
        EncoderCapability::VideoToolbox => {
            cmd.args(["-b:v", cfg.videotoolbox_bitrate.as_str()]);
        }
        EncoderCapability::Qsv => {
            cmd.args(["-preset", "slow", "-global_quality", quality]);
        }
        EncoderCapability::None => {
            cmd.args(["-preset", "slow", "-crf", quality]);
        }
    }
    cmd.args(["-r", fps.as_str()]);

    cmd.args(["-c:a", "aac", "-b:a", cfg.audio_bitrate.as_str()]);
    cmd.args(["-ar", sample_rate.as_str()]);

    cmd.args(["-pix_fmt", "yuv420p", "-movflags", "+faststart", "-y"]);
    cmd.arg(output);
    cmd
}

/// Build the ProRes 422 Standard command
pub fn build_prores_command(
    ffmpeg: &Path,
    input: &Path,
    output: &Path,
    fps: u32,
    cfg: &EncodeConfig,
) -> Command {
    let fps = fps.to_string();
    let sample_rate = cfg.sample_rate.to_string();

    let mut cmd = Command::new(ffmpeg);
    cmd.arg("-i").arg(input);
    cmd.args([
        "-c:v",
        "prores_ks",
        "-profile:v",
        "2",
        "-vendor",
        "apl0",
        "-pix_fmt",
        "yuv422p10le",
    ]);
    cmd.args(["-r", fps.as_str()]);
    cmd.args(["-c:a", "pcm_s16le", "-ar", sample_rate.as_str()]);
    cmd.arg("-y");
    cmd.arg(output);
    cmd
}

const TIME_PATTERN: &str = r"time=(\d+):(\d+):(\d+(?:\.\d+)?)";

fn time_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(TIME_PATTERN).expect("TIME_PATTERN is a valid regex"))
}

/// Extract the `time=HH:MM:SS.ff` position from an ffmpeg status line
pub fn parse_time_seconds(line: &str) -> Option<f64> {
    let caps = time_pattern().captures(line)?;
    let hours: f64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Percentage for a time position, capped below completion
///
/// Returns None when the duration is unknown (zero or negative).
pub fn encode_percent(position: f64, duration: f64) -> Option<f64> {
    if duration > 0.0 {
        Some((position / duration * 100.0).min(MAX_RUNNING_PERCENT))
    } else {
        None
    }
}

/// Run an ffmpeg command, reporting progress against `duration`
///
/// Reports 100 only after the process exits successfully.
pub fn run_with_progress(
    mut cmd: Command,
    duration: f64,
    on_progress: &mut dyn FnMut(f64),
) -> Result<(), EncodeError> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout_reader = child.stdout.take().map(|out| spawn_tail_reader(out, 8));

    let mut tail = LineTail::new(12);
    if let Some(stderr) = child.stderr.take() {
        for_each_line(stderr, |line| match parse_time_seconds(line) {
            Some(position) => {
                if let Some(percent) = encode_percent(position, duration) {
                    on_progress(percent);
                }
            }
            None => tail.push(line),
        })?;
    }

    let status = child.wait()?;
    if let Some(handle) = stdout_reader {
        join_tail(handle);
    }

    if !status.success() {
        return Err(EncodeError::Failed {
            code: status.code(),
            tail: tail.text(),
        });
    }

    on_progress(100.0);
    Ok(())
}

/// Probe `input` and transcode it to `output` with `profile`
pub fn transcode(
    ctx: &EngineContext,
    input: &Path,
    output: &Path,
    profile: EncodeProfile,
    on_progress: &mut dyn FnMut(f64),
) -> Result<(), EncodeError> {
    let tools = &ctx.config.tools;
    let fps = probe_frame_rate(&tools.ffprobe, input);
    let duration = probe_duration(&tools.ffprobe, input);

    let cmd = match profile {
        EncodeProfile::H264Cfr => build_h264_cfr_command(
            &tools.ffmpeg,
            input,
            output,
            fps,
            ctx.effective_capability(),
            &ctx.config.encode,
        ),
        EncodeProfile::Prores => {
            build_prores_command(&tools.ffmpeg, input, output, fps, &ctx.config.encode)
        }
    };

    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        ?profile,
        fps,
        duration,
        "starting transcode"
    );
    run_with_progress(cmd, duration, on_progress)?;
    tracing::info!(output = %output.display(), "transcode complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    fn pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(300))]

        // Running progress never reaches 100.
        #[test]
        fn prop_running_percent_below_hundred(position in 0.0f64..100_000.0, duration in 0.001f64..50_000.0) {
            let percent = encode_percent(position, duration).unwrap();
            prop_assert!(percent < 100.0);
            prop_assert!(percent >= 0.0);
        }

        #[test]
        fn prop_unknown_duration_never_reports(position in 0.0f64..100_000.0, duration in -100.0f64..=0.0) {
            prop_assert_eq!(encode_percent(position, duration), None);
        }

        #[test]
        fn prop_time_parse(h in 0u32..10, m in 0u32..60, s in 0u32..60, cs in 0u32..100) {
            let line = format!("frame= 100 fps= 25 q=28.0 size= 1024kB time={:02}:{:02}:{:02}.{:02} bitrate= 800kbits/s", h, m, s, cs);
            let expected = h as f64 * 3600.0 + m as f64 * 60.0 + s as f64 + cs as f64 / 100.0;
            let parsed = parse_time_seconds(&line).unwrap();
            prop_assert!((parsed - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_time_pattern_compiles() {
        assert!(Regex::new(TIME_PATTERN).is_ok());
        assert_eq!(
            parse_time_seconds("frame=  240 fps= 60 q=23.0 size=    1024kB time=00:01:02.50 bitrate=134.2kbits/s"),
            Some(62.5)
        );
    }

    #[test]
    fn test_time_not_available() {
        assert_eq!(parse_time_seconds("size=N/A time=N/A bitrate=N/A"), None);
    }

    #[test]
    fn test_software_h264_command() {
        let cfg = EncodeConfig::default();
        let cmd = build_h264_cfr_command(
            Path::new("ffmpeg"),
            Path::new("in.mkv"),
            Path::new("out_CFR.mp4"),
            30,
            EncoderCapability::None,
            &cfg,
        );
        let args = args_of(&cmd);

        assert_eq!(&args[..2], &["-i", "in.mkv"]);
        assert!(pair(&args, "-c:v", "libx264"));
        assert!(pair(&args, "-crf", "18"));
        assert!(pair(&args, "-r", "30"));
        assert!(pair(&args, "-c:a", "aac"));
        assert!(pair(&args, "-b:a", "320k"));
        assert!(pair(&args, "-ar", "48000"));
        assert!(pair(&args, "-pix_fmt", "yuv420p"));
        assert!(pair(&args, "-movflags", "+faststart"));
        assert_eq!(args.last().map(String::as_str), Some("out_CFR.mp4"));
    }

    #[test]
    fn test_hardware_h264_commands() {
        let cfg = EncodeConfig::default();
        let build = |capability| {
            args_of(&build_h264_cfr_command(
                Path::new("ffmpeg"),
                Path::new("in.mkv"),
                Path::new("out.mp4"),
                24,
                capability,
                &cfg,
            ))
        };

        let nvenc = build(EncoderCapability::Nvenc);
        assert!(pair(&nvenc, "-c:v", "h264_nvenc"));
        assert!(pair(&nvenc, "-cq", "18"));

        let vt = build(EncoderCapability::VideoToolbox);
        assert!(pair(&vt, "-c:v", "h264_videotoolbox"));
        assert!(pair(&vt, "-b:v", "10M"));
        assert!(!vt.contains(&"-crf".to_string()));

        let qsv = build(EncoderCapability::Qsv);
        assert!(pair(&qsv, "-c:v", "h264_qsv"));
        assert!(pair(&qsv, "-global_quality", "18"));
        assert!(pair(&qsv, "-r", "24"));
    }

    #[test]
    fn test_prores_command() {
        let cfg = EncodeConfig::default();
        let args = args_of(&build_prores_command(
            Path::new("ffmpeg"),
            Path::new("in.mkv"),
            Path::new("out_ProRes.mov"),
            25,
            &cfg,
        ));
        assert!(pair(&args, "-c:v", "prores_ks"));
        assert!(pair(&args, "-profile:v", "2"));
        assert!(pair(&args, "-vendor", "apl0"));
        assert!(pair(&args, "-pix_fmt", "yuv422p10le"));
        assert!(pair(&args, "-r", "25"));
        assert!(pair(&args, "-c:a", "pcm_s16le"));
        assert!(pair(&args, "-ar", "48000"));
    }

    #[test]
    fn test_output_suffixes() {
        assert_eq!(EncodeProfile::H264Cfr.output_suffix(), "_CFR.mp4");
        assert_eq!(EncodeProfile::Prores.output_suffix(), "_ProRes.mov");
    }

    #[cfg(unix)]
    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script]);
        cmd
    }

    #[cfg(unix)]
    #[test]
    fn test_progress_capped_then_completed() {
        let cmd = sh(
            "printf 'frame=1 time=00:00:05.00 bitrate=1\\rframe=2 time=00:00:10.00 bitrate=1\\r' >&2; \
             printf 'frame=3 time=00:00:10.50 bitrate=1\\n' >&2",
        );
        let mut seen = Vec::new();
        run_with_progress(cmd, 10.0, &mut |p| seen.push(p)).unwrap();
        assert_eq!(seen, vec![50.0, 99.0, 99.0, 100.0]);
    }

    #[cfg(unix)]
    #[test]
    fn test_unknown_duration_reports_only_completion() {
        let cmd = sh("echo 'frame=1 time=00:00:05.00' >&2");
        let mut seen = Vec::new();
        run_with_progress(cmd, 0.0, &mut |p| seen.push(p)).unwrap();
        assert_eq!(seen, vec![100.0]);
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_failure() {
        let cmd = sh("echo 'frame=1 time=00:00:05.00' >&2; echo 'Conversion failed!' >&2; exit 1");
        let mut seen = Vec::new();
        let err = run_with_progress(cmd, 10.0, &mut |p| seen.push(p)).unwrap_err();
        match err {
            EncodeError::Failed { code, tail } => {
                assert_eq!(code, Some(1));
                assert!(tail.contains("Conversion failed!"));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
        assert!(seen.iter().all(|p| *p < 100.0));
    }
}

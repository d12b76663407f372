//! Startup checks
//!
//! Preflight checks run by the front-ends before accepting work:
//! - ffmpeg must be runnable (`ffmpeg -version`)
//! - yt-dlp must be runnable (`yt-dlp --version`)

use crate::config::Config;
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("FFmpeg not available: {0}")]
    FfmpegUnavailable(String),

    #[error("yt-dlp not available: {0}")]
    YtDlpUnavailable(String),
}

/// Run `<binary> <flag>` and return its stdout, or a description of the failure
fn run_version(binary: &Path, flag: &str) -> Result<String, String> {
    let output = Command::new(binary)
        .arg(flag)
        .output()
        .map_err(|e| format!("{} {} failed: {}", binary.display(), flag, e))?;

    if !output.status.success() {
        return Err(format!(
            "{} {} exited with {}",
            binary.display(),
            flag,
            output.status
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Extract the first line of `ffmpeg -version` output, e.g. "ffmpeg version 7.1"
pub fn parse_ffmpeg_banner(version_output: &str) -> Option<String> {
    version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))
        .map(|line| {
            line.split(" Copyright")
                .next()
                .unwrap_or(line)
                .trim()
                .to_string()
        })
}

/// Check that ffmpeg is installed and runnable
///
/// Returns the version banner line when it can be parsed.
pub fn check_ffmpeg_available(cfg: &Config) -> Result<Option<String>, StartupError> {
    let stdout = run_version(&cfg.tools.ffmpeg, "-version").map_err(|e| {
        StartupError::FfmpegUnavailable(format!(
            "{}; install FFmpeg (https://ffmpeg.org) and make sure it is in PATH",
            e
        ))
    })?;
    Ok(parse_ffmpeg_banner(&stdout))
}

/// Check that yt-dlp is installed and runnable, returning its version string
pub fn check_yt_dlp_available(cfg: &Config) -> Result<String, StartupError> {
    let stdout = run_version(&cfg.tools.yt_dlp, "--version").map_err(|e| {
        StartupError::YtDlpUnavailable(format!(
            "{}; install it with `pip install -U yt-dlp`",
            e
        ))
    })?;
    Ok(stdout.trim().to_string())
}

/// Run all startup checks in order
///
/// 1. FFmpeg availability
/// 2. yt-dlp availability
pub fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    if let Some(banner) = check_ffmpeg_available(cfg)? {
        tracing::info!(%banner, "ffmpeg found");
    }
    let version = check_yt_dlp_available(cfg)?;
    tracing::info!(%version, "yt-dlp found");
    Ok(())
}

//! Download executor
//!
//! Runs yt-dlp in download mode with a machine-readable progress template.
//! Progress lines arrive on stderr (yt-dlp goes quiet once `--print` is
//! used); the final file path is printed on stdout after post-processing.

use crate::config::DownloadConfig;
use crate::context::EngineContext;
use crate::diagnose;
use crate::encode::ffmpeg::MAX_RUNNING_PERCENT;
use crate::process::{for_each_line, join_tail, spawn_tail_reader, LineTail};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

/// Marker that prefixes every progress line we ask yt-dlp to print
pub const PROGRESS_MARKER: &str = "[cutready]";

const PROGRESS_TEMPLATE: &str = "download:[cutready] %(progress.status)s %(progress.downloaded_bytes)s %(progress.total_bytes)s %(progress.total_bytes_estimate)s";

/// Error types for the download executor
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("failed to run yt-dlp: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("yt-dlp failed (exit code {code:?}): {message}")]
    Failed { code: Option<i32>, message: String },

    #[error("yt-dlp did not report an output file")]
    NoOutput,
}

impl DownloadError {
    /// Whether the failure comes from a resource held by another process
    pub fn is_resource_lock(&self) -> bool {
        match self {
            DownloadError::Failed { message, .. } => diagnose::classify(message).is_resource_lock(),
            _ => false,
        }
    }
}

/// Where the downloaded file should land
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadTarget {
    /// Final file named after the title, merged to MP4 with embedded metadata
    Final,
    /// Temporary MKV named after the external id, input for a transcode
    Temp { external_id: String },
}

impl DownloadTarget {
    fn output_template(&self, output_dir: &Path) -> PathBuf {
        match self {
            DownloadTarget::Final => output_dir.join("%(title)s.%(ext)s"),
            DownloadTarget::Temp { external_id } => {
                output_dir.join(format!("temp_{}.%(ext)s", external_id))
            }
        }
    }
}

/// One parsed progress line
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressLine {
    /// yt-dlp progress status: "downloading", "finished" or "error"
    pub status: String,
    /// Percentage when a total size is known; may exceed 100 on a low estimate
    pub percent: Option<f64>,
}

fn parse_bytes(field: Option<&str>) -> Option<f64> {
    field
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

/// Parse a line printed through the progress template
///
/// Fields reported as `NA` are unknown. The exact total is preferred over
/// the estimate.
pub fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let rest = line.trim().strip_prefix(PROGRESS_MARKER)?;
    let mut fields = rest.split_whitespace();
    let status = fields.next()?.to_string();
    let downloaded = parse_bytes(fields.next());
    let total = parse_bytes(fields.next());
    let estimate = parse_bytes(fields.next());

    let total = total.filter(|t| *t > 0.0).or(estimate.filter(|t| *t > 0.0));
    let percent = match (downloaded, total) {
        (Some(downloaded), Some(total)) => Some(downloaded / total * 100.0),
        _ => None,
    };

    Some(ProgressLine { status, percent })
}

/// Client options shared by metadata and download invocations
pub fn client_args(cfg: &DownloadConfig) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(browser) = &cfg.cookies_from_browser {
        args.push("--cookies-from-browser".to_string());
        args.push(browser.clone());
    }
    if let Some(target) = &cfg.impersonate {
        args.push("--impersonate".to_string());
        args.push(target.clone());
    }
    if let Some(client) = &cfg.player_client {
        args.push("--extractor-args".to_string());
        args.push(format!("youtube:player_client={}", client));
    }
    args
}

/// Build the yt-dlp download command
pub fn download_command(
    ctx: &EngineContext,
    url: &str,
    format_expression: &str,
    output_dir: &Path,
    target: &DownloadTarget,
) -> Command {
    let mut cmd = Command::new(&ctx.config.tools.yt_dlp);
    cmd.args([
        "--newline",
        "--progress",
        "--no-simulate",
        "--no-warnings",
        "--playlist-items",
        "1",
        "--progress-template",
        PROGRESS_TEMPLATE,
        "--print",
        "after_move:filepath",
    ]);
    cmd.arg("--ffmpeg-location").arg(&ctx.config.tools.ffmpeg);
    cmd.arg("-f").arg(format_expression);
    cmd.arg("-o").arg(target.output_template(output_dir));

    match target {
        DownloadTarget::Final => {
            cmd.args(["--merge-output-format", "mp4", "--embed-metadata"]);
        }
        DownloadTarget::Temp { .. } => {
            cmd.args(["--merge-output-format", "mkv"]);
        }
    }

    cmd.args(client_args(&ctx.config.download));
    cmd.arg(url);
    cmd
}

/// Run a download command, reporting percentages to `on_progress`
///
/// A merged download finishes one stream per format, so running percentages
/// stay below 100 and 100 is reported once, on a successful exit. Returns the
/// last path printed on stdout.
pub fn run_download(
    mut cmd: Command,
    on_progress: &mut dyn FnMut(f64),
) -> Result<PathBuf, DownloadError> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout_reader = child.stdout.take().map(|out| spawn_tail_reader(out, 64));

    let mut errors = LineTail::new(20);
    if let Some(stderr) = child.stderr.take() {
        for_each_line(stderr, |line| match parse_progress_line(line) {
            Some(progress) => {
                if let Some(percent) = progress.percent.filter(|_| progress.status != "finished") {
                    on_progress(percent.min(MAX_RUNNING_PERCENT));
                }
            }
            None => errors.push(line),
        })?;
    }

    let status = child.wait()?;
    let stdout = stdout_reader.map(join_tail).unwrap_or_default();

    if !status.success() {
        let text = errors.text();
        let message = text
            .lines()
            .rev()
            .find(|line| line.starts_with("ERROR:"))
            .map(str::to_string)
            .unwrap_or(text);
        return Err(DownloadError::Failed {
            code: status.code(),
            message,
        });
    }

    on_progress(100.0);

    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && parse_progress_line(line).is_none())
        .last()
        .map(PathBuf::from)
        .ok_or(DownloadError::NoOutput)
}

/// Download `url` into `output_dir`, returning the local file path
pub fn download(
    ctx: &EngineContext,
    url: &str,
    format_expression: &str,
    output_dir: &Path,
    target: &DownloadTarget,
    on_progress: &mut dyn FnMut(f64),
) -> Result<PathBuf, DownloadError> {
    tracing::info!(url, format = format_expression, ?target, "starting download");
    let path = run_download(
        download_command(ctx, url, format_expression, output_dir, target),
        on_progress,
    )?;
    tracing::info!(url, path = %path.display(), "download complete");
    Ok(path)
}

//! Metadata fetcher
//!
//! Runs yt-dlp in metadata-only mode (`-J`), normalizes title, thumbnail and
//! id, and posts exactly one event per fetch onto the update channel.

use crate::context::EngineContext;
use crate::diagnose::{self, FailureKind};
use crate::download::client_args;
use crate::jobs::JobStatus;
use crate::updates::{JobUpdate, UpdateSender};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::process::Command;
use thiserror::Error;

const UNKNOWN_TITLE: &str = "Unknown Title";

/// Error types for metadata retrieval
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to run yt-dlp: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("{message}")]
    Failed { message: String },

    #[error("unreadable metadata: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("playlist has no entries")]
    EmptyCollection,
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::Failed { message } => diagnose::classify(message),
            FetchError::EmptyCollection => FailureKind::UnsupportedFormat,
            _ => FailureKind::Unknown,
        }
    }

    /// Message shown to the user in place of the title
    pub fn user_message(&self) -> String {
        match self {
            FetchError::Failed { message } => self.kind().user_message(message),
            other => other.to_string(),
        }
    }
}

/// Normalized metadata of one video
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub title: String,
    pub thumbnail: Option<String>,
    pub external_id: Option<String>,
    /// Number of entries when the URL is a playlist or mix
    pub entry_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawThumbnail {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    title: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<RawThumbnail>,
    id: Option<String>,
    entries: Option<Vec<Option<RawInfo>>>,
    playlist_count: Option<usize>,
}

impl RawInfo {
    fn thumbnail(&self) -> Option<String> {
        self.thumbnail
            .clone()
            .or_else(|| self.thumbnails.iter().rev().find_map(|t| t.url.clone()))
    }
}

/// Parse the JSON printed by `yt-dlp -J`
///
/// A playlist takes its metadata from the first entry and its title is
/// annotated with the number of remaining entries.
pub fn parse_metadata(json: &str) -> Result<VideoMetadata, FetchError> {
    let info: RawInfo = serde_json::from_str(json)?;

    let Some(entries) = &info.entries else {
        return Ok(VideoMetadata {
            title: info.title.clone().unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            thumbnail: info.thumbnail(),
            external_id: info.id.clone(),
            entry_count: None,
        });
    };

    let present: Vec<&RawInfo> = entries.iter().flatten().collect();
    let first = present.first().ok_or(FetchError::EmptyCollection)?;
    let count = info.playlist_count.unwrap_or(entries.len()).max(present.len());

    let base = first
        .title
        .clone()
        .or_else(|| info.title.clone())
        .unwrap_or_else(|| UNKNOWN_TITLE.to_string());
    let title = if count > 1 {
        format!("{} (+{} more)", base, count - 1)
    } else {
        base
    };

    Ok(VideoMetadata {
        title,
        thumbnail: first.thumbnail().or_else(|| info.thumbnail()),
        external_id: first.id.clone().or_else(|| info.id.clone()),
        entry_count: Some(count),
    })
}

/// Deterministic id derived from the URL, used when the platform gives none
pub fn fallback_external_id(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("url-{}", &hex[..12])
}

/// Build the metadata-only yt-dlp command for `url`
pub fn metadata_command(ctx: &EngineContext, url: &str) -> Command {
    let mut cmd = Command::new(&ctx.config.tools.yt_dlp);
    cmd.args(["-J", "--flat-playlist", "--no-warnings"]);
    cmd.args(client_args(&ctx.config.download));
    cmd.arg(url);
    cmd
}

/// Run a metadata command and parse its output
pub fn run_metadata_command(mut cmd: Command) -> Result<VideoMetadata, FetchError> {
    let output = cmd.output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = stderr.trim();
        return Err(FetchError::Failed {
            message: if message.is_empty() {
                format!("yt-dlp exited with {}", output.status)
            } else {
                message.to_string()
            },
        });
    }

    parse_metadata(&String::from_utf8_lossy(&output.stdout))
}

/// Turn a fetch result into the single event posted for it
pub fn fetch_event(url: &str, result: Result<VideoMetadata, FetchError>) -> JobUpdate {
    match result {
        Ok(meta) => {
            let id = meta.external_id.unwrap_or_else(|| fallback_external_id(url));
            JobUpdate::for_job(url)
                .title(meta.title)
                .thumbnail(meta.thumbnail)
                .external_id(id)
        }
        Err(e) => {
            let message = e.user_message();
            JobUpdate::for_job(url)
                .title(format!("Error: {}", message))
                .status(JobStatus::Failed)
                .error(message)
                .external_id(fallback_external_id(url))
        }
    }
}

/// Fetch metadata for `url` and post the outcome
///
/// Blocks on the yt-dlp subprocess; run it on a blocking thread.
pub fn fetch(ctx: &EngineContext, url: &str, tx: &UpdateSender) {
    tracing::debug!(url, "fetching metadata");
    let result = run_metadata_command(metadata_command(ctx, url));
    match &result {
        Ok(meta) => tracing::info!(url, title = %meta.title, "metadata fetched"),
        Err(e) => tracing::warn!(url, error = %e, "metadata fetch failed"),
    }
    tx.send(fetch_event(url, result));
}

//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// How a downloaded video is delivered to the output directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FormatMode {
    /// Stream selection and muxing only, no re-encode
    Passthrough,
    /// Constant-frame-rate H.264 in an MP4 container
    #[default]
    H264Cfr,
    /// ProRes 422 Standard in a MOV container
    Prores,
}

impl FormatMode {
    pub const ALL: [FormatMode; 3] = [FormatMode::Passthrough, FormatMode::H264Cfr, FormatMode::Prores];

    pub fn as_str(&self) -> &'static str {
        match self {
            FormatMode::Passthrough => "passthrough",
            FormatMode::H264Cfr => "h264_cfr",
            FormatMode::Prores => "prores",
        }
    }

    /// Human readable label, as shown in front-ends
    pub fn label(&self) -> &'static str {
        match self {
            FormatMode::Passthrough => "Pass-through (MP4/MKV)",
            FormatMode::H264Cfr => "Editor Ready (H.264 CFR)",
            FormatMode::Prores => "Editor Ready (ProRes 422)",
        }
    }
}

impl fmt::Display for FormatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "passthrough" | "pass_through" | "pass_through (mp4/mkv)" => Ok(FormatMode::Passthrough),
            "h264_cfr" | "h264" | "cfr" | "editor ready (h.264 cfr)" => Ok(FormatMode::H264Cfr),
            "prores" | "prores_422" | "editor ready (prores 422)" => Ok(FormatMode::Prores),
            _ => Err(format!(
                "unknown format mode '{}', expected one of: passthrough, h264_cfr, prores",
                s
            )),
        }
    }
}

/// External tool locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    /// yt-dlp executable (name on PATH or absolute path)
    #[serde(default = "default_yt_dlp")]
    pub yt_dlp: PathBuf,
    /// ffmpeg executable
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
    /// ffprobe executable
    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,
}

fn default_yt_dlp() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp: default_yt_dlp(),
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
        }
    }
}

/// Download defaults and extractor client options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadConfig {
    /// Directory finished files are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Resolution label, see the engine's resolver for accepted values
    #[serde(default = "default_resolution")]
    pub resolution: String,
    /// Default delivery mode
    #[serde(default)]
    pub mode: FormatMode,
    /// Browser to read cookies from (passed to `--cookies-from-browser`)
    #[serde(default)]
    pub cookies_from_browser: Option<String>,
    /// Client impersonation target (passed to `--impersonate`)
    #[serde(default)]
    pub impersonate: Option<String>,
    /// Extractor player clients, e.g. "web,web_safari"
    #[serde(default)]
    pub player_client: Option<String>,
}

fn default_output_dir() -> PathBuf {
    env::var_os("HOME")
        .map(|home| PathBuf::from(home).join("Downloads"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_resolution() -> String {
    "1080p".to_string()
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            resolution: default_resolution(),
            mode: FormatMode::default(),
            cookies_from_browser: None,
            impersonate: None,
            player_client: None,
        }
    }
}

/// Queue processing policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    /// Attempts per job before it is marked failed
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

fn default_retry_attempts() -> u32 {
    3
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
        }
    }
}

/// Encoder settings shared by the transcode profiles
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncodeConfig {
    /// Quality target (CRF for libx264, CQ for NVENC, global_quality for QSV)
    #[serde(default = "default_quality")]
    pub quality: u32,
    /// AAC bitrate for the H.264 profile
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    /// Audio sample rate for both profiles
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Target bitrate for VideoToolbox, which has no constant-quality mode
    #[serde(default = "default_videotoolbox_bitrate")]
    pub videotoolbox_bitrate: String,
    /// Use a detected hardware encoder when available
    #[serde(default = "default_hardware_acceleration")]
    pub hardware_acceleration: bool,
}

fn default_quality() -> u32 {
    18
}

fn default_audio_bitrate() -> String {
    "320k".to_string()
}

fn default_sample_rate() -> u32 {
    48000
}

fn default_videotoolbox_bitrate() -> String {
    "10M".to_string()
}

fn default_hardware_acceleration() -> bool {
    true
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            quality: default_quality(),
            audio_bitrate: default_audio_bitrate(),
            sample_rate: default_sample_rate(),
            videotoolbox_bitrate: default_videotoolbox_bitrate(),
            hardware_acceleration: default_hardware_acceleration(),
        }
    }
}

/// Presentation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UiConfig {
    /// Interval between update channel drains
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub encode: EncodeConfig,
    #[serde(default)]
    pub ui: UiConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - CUTREADY_YT_DLP -> tools.yt_dlp
    /// - CUTREADY_FFMPEG -> tools.ffmpeg
    /// - CUTREADY_FFPROBE -> tools.ffprobe
    /// - CUTREADY_OUTPUT_DIR -> download.output_dir
    /// - CUTREADY_RESOLUTION -> download.resolution
    /// - CUTREADY_MODE -> download.mode
    /// - CUTREADY_COOKIES_FROM_BROWSER -> download.cookies_from_browser
    /// - CUTREADY_IMPERSONATE -> download.impersonate
    /// - CUTREADY_PLAYER_CLIENT -> download.player_client
    /// - CUTREADY_RETRY_ATTEMPTS -> queue.retry_attempts
    /// - CUTREADY_ENCODE_QUALITY -> encode.quality
    /// - CUTREADY_HARDWARE_ACCELERATION -> encode.hardware_acceleration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("CUTREADY_YT_DLP") {
            self.tools.yt_dlp = PathBuf::from(val);
        }

        if let Ok(val) = env::var("CUTREADY_FFMPEG") {
            self.tools.ffmpeg = PathBuf::from(val);
        }

        if let Ok(val) = env::var("CUTREADY_FFPROBE") {
            self.tools.ffprobe = PathBuf::from(val);
        }

        if let Ok(val) = env::var("CUTREADY_OUTPUT_DIR") {
            self.download.output_dir = PathBuf::from(val);
        }

        if let Ok(val) = env::var("CUTREADY_RESOLUTION") {
            self.download.resolution = val;
        }

        if let Ok(val) = env::var("CUTREADY_MODE") {
            if let Ok(mode) = val.parse::<FormatMode>() {
                self.download.mode = mode;
            }
        }

        // Empty values clear the option
        if let Ok(val) = env::var("CUTREADY_COOKIES_FROM_BROWSER") {
            self.download.cookies_from_browser = non_empty(val);
        }

        if let Ok(val) = env::var("CUTREADY_IMPERSONATE") {
            self.download.impersonate = non_empty(val);
        }

        if let Ok(val) = env::var("CUTREADY_PLAYER_CLIENT") {
            self.download.player_client = non_empty(val);
        }

        if let Ok(val) = env::var("CUTREADY_RETRY_ATTEMPTS") {
            if let Ok(attempts) = val.parse::<u32>() {
                self.queue.retry_attempts = attempts;
            }
        }

        if let Ok(val) = env::var("CUTREADY_ENCODE_QUALITY") {
            if let Ok(quality) = val.parse::<u32>() {
                self.encode.quality = quality;
            }
        }

        if let Ok(val) = env::var("CUTREADY_HARDWARE_ACCELERATION") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.encode.hardware_acceleration = true,
                "false" | "0" | "no" => self.encode.hardware_acceleration = false,
                _ => {} // Invalid value, keep existing
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Attempts per job, never less than one
    pub fn retry_budget(&self) -> u32 {
        self.queue.retry_attempts.max(1)
    }
}

fn non_empty(val: String) -> Option<String> {
    let trimmed = val.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

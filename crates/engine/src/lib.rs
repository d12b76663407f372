//! cutready engine
//!
//! Download-and-transcode job pipeline: metadata fetching, yt-dlp downloads,
//! CFR H.264 / ProRes transcodes, a sequential retrying job queue and the
//! update channel that carries progress back to a presentation layer.

pub mod capability;
pub mod context;
pub mod diagnose;
pub mod download;
pub mod encode;
pub mod format;
pub mod jobs;
pub mod metadata;
pub mod process;
pub mod queue;
pub mod session;
pub mod startup;
pub mod updates;

pub use capability::{parse_encoder_list, probe, EncoderCapability};
pub use context::EngineContext;
pub use cutready_config as config;
pub use cutready_config::{Config, FormatMode};
pub use diagnose::{classify, truncate_message, FailureKind};
pub use download::{download, DownloadError, DownloadTarget};
pub use encode::{
    build_h264_cfr_command, build_prores_command, probe_duration, probe_frame_rate,
    snap_frame_rate, transcode, EncodeError, EncodeProfile, ProbeError,
};
pub use format::{resolve, RESOLUTION_LABELS};
pub use jobs::{Job, JobBoard, JobCounts, JobStatus, QueuedJob, SubmitError};
pub use metadata::{fallback_external_id, fetch, FetchError, VideoMetadata};
pub use queue::{
    process_queue, sanitize_filename, JobError, JobReporter, JobRunner, QueueSummary, RunPlan,
    ToolRunner,
};
pub use session::{RunEnd, Session, StartError};
pub use startup::{check_ffmpeg_available, check_yt_dlp_available, run_startup_checks, StartupError};
pub use updates::{update_channel, JobUpdate, UpdateReceiver, UpdateSender};

//! Transcode executor: source probing and ffmpeg invocation

pub mod ffmpeg;
pub mod probe;

pub use ffmpeg::{
    build_h264_cfr_command, build_prores_command, run_with_progress, transcode, EncodeError,
    EncodeProfile,
};
pub use probe::{probe_duration, probe_frame_rate, snap_frame_rate, ProbeError};

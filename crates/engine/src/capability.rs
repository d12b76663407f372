//! Hardware encoder capability probing
//!
//! Runs `ffmpeg -hide_banner -encoders` once at startup and picks the best
//! accelerated H.264 encoder available on this machine.

use std::path::Path;
use std::process::Command;

/// Accelerated H.264 back-end available to the encoder binary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EncoderCapability {
    /// Software encoding only (libx264)
    #[default]
    None,
    /// NVIDIA NVENC (`h264_nvenc`)
    Nvenc,
    /// Apple VideoToolbox (`h264_videotoolbox`), macOS only
    VideoToolbox,
    /// Intel Quick Sync Video (`h264_qsv`)
    Qsv,
}

impl EncoderCapability {
    /// ffmpeg encoder name for this back-end
    pub fn encoder_name(&self) -> &'static str {
        match self {
            EncoderCapability::None => "libx264",
            EncoderCapability::Nvenc => "h264_nvenc",
            EncoderCapability::VideoToolbox => "h264_videotoolbox",
            EncoderCapability::Qsv => "h264_qsv",
        }
    }
}

impl std::fmt::Display for EncoderCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncoderCapability::None => write!(f, "software"),
            EncoderCapability::Nvenc => write!(f, "nvenc"),
            EncoderCapability::VideoToolbox => write!(f, "videotoolbox"),
            EncoderCapability::Qsv => write!(f, "qsv"),
        }
    }
}

/// Pick the best back-end from an `ffmpeg -encoders` listing
///
/// Priority is NVENC, then VideoToolbox (only when `is_macos`), then QSV.
pub fn parse_encoder_list(listing: &str, is_macos: bool) -> EncoderCapability {
    if listing.contains("h264_nvenc") {
        return EncoderCapability::Nvenc;
    }
    if is_macos && listing.contains("h264_videotoolbox") {
        return EncoderCapability::VideoToolbox;
    }
    if listing.contains("h264_qsv") {
        return EncoderCapability::Qsv;
    }
    EncoderCapability::None
}

/// Probe the encoder binary at `ffmpeg`
///
/// Any failure to run the binary, or a non-zero exit, yields
/// [`EncoderCapability::None`].
pub fn probe(ffmpeg: &Path) -> EncoderCapability {
    let output = match Command::new(ffmpeg)
        .args(["-hide_banner", "-encoders"])
        .output()
    {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!(error = %e, binary = %ffmpeg.display(), "encoder probe failed to start");
            return EncoderCapability::None;
        }
    };

    if !output.status.success() {
        tracing::warn!(status = %output.status, "encoder probe exited with failure");
        return EncoderCapability::None;
    }

    let listing = String::from_utf8_lossy(&output.stdout);
    let capability = parse_encoder_list(&listing, cfg!(target_os = "macos"));
    tracing::info!(%capability, "encoder capability probed");
    capability
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const LISTING: &str = "\
Encoders:
 V..... = Video
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC / MPEG-4 part 10 (codec h264)
 V....D h264_nvenc           NVIDIA NVENC H.264 encoder (codec h264)
 V....D h264_qsv             H.264 / AVC / MPEG-4 AVC / MPEG-4 part 10 (Intel Quick Sync Video acceleration) (codec h264)
 V....D h264_videotoolbox    VideoToolbox H.264 Encoder (codec h264)
";

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_listing_without_tokens_is_software(listing in "[a-z0-9 \n]{0,200}", macos in any::<bool>()) {
            prop_assume!(!listing.contains("h264_"));
            prop_assert_eq!(parse_encoder_list(&listing, macos), EncoderCapability::None);
        }
    }

    #[test]
    fn test_nvenc_wins() {
        assert_eq!(parse_encoder_list(LISTING, true), EncoderCapability::Nvenc);
        assert_eq!(parse_encoder_list(LISTING, false), EncoderCapability::Nvenc);
    }

    #[test]
    fn test_videotoolbox_only_on_macos() {
        let listing = " V....D h264_videotoolbox    VideoToolbox H.264 Encoder\n V....D h264_qsv  QSV\n";
        assert_eq!(parse_encoder_list(listing, true), EncoderCapability::VideoToolbox);
        assert_eq!(parse_encoder_list(listing, false), EncoderCapability::Qsv);

        let listing = " V....D h264_videotoolbox    VideoToolbox H.264 Encoder\n";
        assert_eq!(parse_encoder_list(listing, false), EncoderCapability::None);
    }

    #[test]
    fn test_probe_missing_binary_is_software() {
        let capability = probe(Path::new("/nonexistent/cutready/ffmpeg"));
        assert_eq!(capability, EncoderCapability::None);
    }

    #[cfg(unix)]
    #[test]
    fn test_probe_failing_binary_is_software() {
        assert_eq!(probe(Path::new("false")), EncoderCapability::None);
    }

    #[test]
    fn test_encoder_names() {
        assert_eq!(EncoderCapability::None.encoder_name(), "libx264");
        assert_eq!(EncoderCapability::Qsv.encoder_name(), "h264_qsv");
        assert_eq!(EncoderCapability::VideoToolbox.to_string(), "videotoolbox");
    }
}

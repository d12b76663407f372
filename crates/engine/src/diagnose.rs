//! Failure classification for extractor and encoder messages
//!
//! yt-dlp only reports failures as text on stderr, so failures are sorted
//! into a few families by case-insensitive substring signatures.

/// Family of a failure message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Login required or browser cookies missing or invalid
    AuthCookie,
    /// Private, removed or geo-blocked media
    AccessDenied,
    /// The platform throttled the client
    RateLimited,
    /// No matching format, or the URL is not supported by the extractor
    UnsupportedFormat,
    /// An external process holds a resource exclusively (cookie store lock)
    ResourceLock,
    Unknown,
}

const RESOURCE_LOCK_SIGNATURES: &[&str] = &["database is locked", "being used by another process"];
const RATE_LIMIT_SIGNATURES: &[&str] = &["http error 429", "too many requests", "rate limit"];
const ACCESS_DENIED_SIGNATURES: &[&str] = &[
    "http error 403",
    "forbidden",
    "private video",
    "video unavailable",
    "not available in your country",
];
const AUTH_SIGNATURES: &[&str] = &[
    "sign in",
    "login required",
    "cookies",
    "cookie",
    "confirm you're not a bot",
    "age-restricted",
];
const UNSUPPORTED_SIGNATURES: &[&str] = &[
    "requested format is not available",
    "unsupported url",
    "no video formats found",
];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Classify a raw failure message
///
/// The resource lock is checked first, since a locked cookie store also
/// mentions cookies.
pub fn classify(message: &str) -> FailureKind {
    let lower = message.to_lowercase();

    if contains_any(&lower, RESOURCE_LOCK_SIGNATURES)
        || (lower.contains("could not copy") && lower.contains("cookie"))
    {
        return FailureKind::ResourceLock;
    }
    if contains_any(&lower, RATE_LIMIT_SIGNATURES) {
        return FailureKind::RateLimited;
    }
    if contains_any(&lower, ACCESS_DENIED_SIGNATURES) {
        return FailureKind::AccessDenied;
    }
    if contains_any(&lower, AUTH_SIGNATURES) {
        return FailureKind::AuthCookie;
    }
    if contains_any(&lower, UNSUPPORTED_SIGNATURES) {
        return FailureKind::UnsupportedFormat;
    }
    FailureKind::Unknown
}

impl FailureKind {
    pub fn is_resource_lock(&self) -> bool {
        matches!(self, FailureKind::ResourceLock)
    }

    /// Short user-facing message for a failure of this kind
    ///
    /// Unknown failures keep the first line of the raw message.
    pub fn user_message(&self, raw: &str) -> String {
        match self {
            FailureKind::AuthCookie | FailureKind::ResourceLock => {
                "Sign-in required; check browser cookies (close the browser if its cookie store is locked)".to_string()
            }
            FailureKind::AccessDenied => "Access denied; the video is private or unavailable".to_string(),
            FailureKind::RateLimited => "Rate limited by the platform; try again later".to_string(),
            FailureKind::UnsupportedFormat => "Unsupported URL or format".to_string(),
            FailureKind::Unknown => {
                let first = raw.lines().map(str::trim).find(|line| !line.is_empty()).unwrap_or("");
                let first = first.strip_prefix("ERROR:").map(str::trim).unwrap_or(first);
                if first.is_empty() {
                    "Unknown error".to_string()
                } else {
                    truncate_message(first, 120)
                }
            }
        }
    }
}

/// Truncate to at most `max_chars` characters, appending "..." when cut
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let mut cut: String = message.chars().take(max_chars.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

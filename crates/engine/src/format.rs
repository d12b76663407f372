//! Resolution label to yt-dlp format expression

/// Expression used when no height constraint applies
pub const BEST_FORMAT: &str = "bestvideo+bestaudio/best";

/// Labels offered by the front-ends, highest first
pub const RESOLUTION_LABELS: [&str; 4] = ["4K (2160p)", "1080p (Full HD)", "720p (HD)", "best"];

/// Maximum height for a resolution label, or None for unconstrained
pub fn max_height(label: &str) -> Option<u32> {
    let normalized = label.trim().to_lowercase();
    let height = match normalized.as_str() {
        "4k (2160p)" | "4k" | "2160p" | "2160" => 2160,
        "1080p (full hd)" | "1080p" | "1080" => 1080,
        "720p (hd)" | "720p" | "720" => 720,
        _ => return None,
    };
    Some(height)
}

/// Map a resolution label to a format selection expression
///
/// Never fails: unknown labels, including "best", resolve to the
/// unconstrained expression.
pub fn resolve(label: &str) -> String {
    match max_height(label) {
        Some(h) => format!("bestvideo[height<={h}]+bestaudio/best[height<={h}]/best"),
        None => BEST_FORMAT.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_resolve_total(label in "\\PC{0,30}") {
            let expression = resolve(&label);
            prop_assert!(expression.ends_with("best"));
            prop_assert!(expression.contains("bestvideo"));
        }
    }

    #[test]
    fn test_known_labels() {
        assert_eq!(
            resolve("1080p"),
            "bestvideo[height<=1080]+bestaudio/best[height<=1080]/best"
        );
        assert_eq!(resolve("4K (2160p)"), resolve("4k"));
        assert_eq!(resolve("720p (HD)"), resolve(" 720P "));
        assert_eq!(resolve("1080p (Full HD)"), resolve("1080p"));
    }

    #[test]
    fn test_unknown_falls_back_to_best() {
        assert_eq!(resolve("best"), BEST_FORMAT);
        assert_eq!(resolve("8K"), BEST_FORMAT);
        assert_eq!(resolve(""), BEST_FORMAT);
    }

    #[test]
    fn test_labels_all_resolve() {
        let heights: Vec<Option<u32>> = RESOLUTION_LABELS.iter().map(|l| max_height(l)).collect();
        assert_eq!(heights, vec![Some(2160), Some(1080), Some(720), None]);
    }
}

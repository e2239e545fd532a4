//! Client-safe error summaries.

use regex::Regex;
use std::sync::OnceLock;

/// Maximum characters kept in a sanitized summary.
pub const MAX_SUMMARY_LEN: usize = 200;

fn path_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"(?:[A-Za-z]:\\|/)(?:[^\s/\\:'"]+[/\\])+[^\s/\\:'"]*"#).ok())
        .as_ref()
}

fn backtrace_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?is)(?:stack backtrace:|traceback \(most recent call last\):).*$").ok())
        .as_ref()
}

/// Strips filesystem paths and backtraces and truncates long messages.
#[must_use]
pub fn sanitize_error(message: &str) -> String {
    let mut clean = message.to_string();
    if let Some(pattern) = backtrace_pattern() {
        clean = pattern.replace(&clean, "").into_owned();
    }
    if let Some(pattern) = path_pattern() {
        clean = pattern.replace_all(&clean, "<path>").into_owned();
    }
    let collapsed = clean.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() > MAX_SUMMARY_LEN {
        let mut truncated: String = collapsed.chars().take(MAX_SUMMARY_LEN).collect();
        truncated.push_str("...");
        truncated
    } else {
        collapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_unix_and_windows_paths() {
        let msg = "failed to open /var/lib/relay/secrets.json and C:\\Users\\ops\\key.pem";
        let clean = sanitize_error(msg);
        assert!(!clean.contains("/var/lib"));
        assert!(!clean.contains("Users"));
        assert!(clean.contains("<path>"));
    }

    #[test]
    fn test_strips_backtrace() {
        let msg = "query failed\nstack backtrace:\n   0: relayflow::data::run\n   1: tokio::runtime";
        assert_eq!(sanitize_error(msg), "query failed");
    }

    #[test]
    fn test_truncates_long_payloads() {
        let msg = "x".repeat(1_000);
        let clean = sanitize_error(&msg);
        assert_eq!(clean.len(), MAX_SUMMARY_LEN + 3);
        assert!(clean.ends_with("..."));
    }

    #[test]
    fn test_short_message_unchanged() {
        assert_eq!(sanitize_error("Retries exhausted"), "Retries exhausted");
    }
}

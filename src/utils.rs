//! Utility functions for string truncation, whitespace cleanup, and file system setup.

use chrono::{DateTime, TimeDelta, Utc};
use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Truncate a string for logging purposes.
///
/// Long strings are cut to `max` characters with an ellipsis and byte count
/// indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log("a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

/// Keep at most `max` characters of `s`, appending `"..."` when anything was cut.
pub fn truncate_with_ellipsis(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}...", &s[..cut]),
    }
}

/// Collapse runs of whitespace into single spaces and trim both ends.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Ensure the directory that will hold `path` exists and is writable.
///
/// Creates missing directories, then writes and removes a probe file next to
/// `path`. A bare file name (no parent) is checked against the current directory.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_parent_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).await?;

    let probe_path = parent.join("..__probe_write__");
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!(dir = %parent.display(), "Directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

/// The instant `span` before `now`, or `None` when the span or the result
/// is out of chrono's range.
pub fn checked_ago(now: DateTime<Utc>, span: Option<TimeDelta>) -> Option<DateTime<Utc>> {
    span.and_then(|span| now.checked_sub_signed(span))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_ago_saturates_to_none() {
        let now = Utc::now();
        assert_eq!(
            checked_ago(now, TimeDelta::try_hours(24)),
            Some(now - TimeDelta::hours(24))
        );
        assert_eq!(checked_ago(now, TimeDelta::try_days(i64::MAX)), None);
        // A representable span that still reaches past the earliest instant.
        assert_eq!(checked_ago(now, TimeDelta::try_days(100_000_000)), None);
    }

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_multibyte_boundary() {
        let s = "ñandú ñandú";
        assert_eq!(truncate_for_log(s, 2), "ña…(+12 bytes)");
    }

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("abc", 3), "abc");
        assert_eq!(truncate_with_ellipsis("abcdef", 3), "abc...");
        assert_eq!(truncate_with_ellipsis("", 3), "");
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  Spurs \n\t win  big "), "Spurs win big");
        assert_eq!(collapse_whitespace("   "), "");
    }

    #[tokio::test]
    async fn test_ensure_parent_dir_creates_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested/deeper/news.db");
        ensure_parent_dir(&db).await.unwrap();
        assert!(dir.path().join("nested/deeper").is_dir());
        assert!(!dir.path().join("nested/deeper/..__probe_write__").exists());
    }
}

use chrono::{Local, TimeZone};
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

pub fn simplify_file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .to_string()
}

/// The modification time of a file, in seconds since the epoch.
pub fn file_mtime_seconds(path: &str) -> Option<i64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let secs = modified.duration_since(UNIX_EPOCH).ok()?.as_secs();
    Some(secs as i64)
}

pub fn mtime_rounded_minute(secs: i64) -> i64 {
    secs.div_euclid(60) * 60
}

/// `2026-01-05 10:42` in local time. Falls back to the current time when the modification
/// time is unknown.
pub fn updated_label(mtime_minute: Option<i64>) -> String {
    let when = mtime_minute
        .and_then(|secs| Local.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Local::now);
    when.format("%Y-%m-%d %H:%M").to_string()
}

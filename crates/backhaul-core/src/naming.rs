//! Artifact naming grammar.
//!
//! Every name is rendered on India Standard Time (UTC+05:30, no daylight saving) so the
//! folders stay compatible with archives produced by earlier deployments.

use chrono::{DateTime, FixedOffset, Offset, Utc};

/// Default extension for panel snapshots.
pub const DEFAULT_EXTENSION: &str = "tar.gz";

const IST_OFFSET_SECS: i32 = 5 * 3_600 + 30 * 60;

/// India Standard Time offset.
#[must_use]
pub fn ist() -> FixedOffset {
    FixedOffset::east_opt(IST_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Convert a UTC instant to IST wall-clock time.
#[must_use]
pub fn to_ist(at: DateTime<Utc>) -> DateTime<FixedOffset> {
    at.with_timezone(&ist())
}

/// Name for the frequent copy, e.g. `29-Nov-02PM.tar.gz`.
#[must_use]
pub fn primary_name(at: DateTime<Utc>, extension: &str) -> String {
    format!("{}.{extension}", to_ist(at).format("%d-%b-%I%p"))
}

/// Name for the daily copy, e.g. `29-Nov-2025.tar.gz`.
#[must_use]
pub fn archive_name(at: DateTime<Utc>, extension: &str) -> String {
    format!("{}.{extension}", to_ist(at).format("%d-%b-%Y"))
}

/// Local staging file name, e.g. `backup_2025-11-29_14-05-09.tar.gz`.
#[must_use]
pub fn staging_name(at: DateTime<Utc>, extension: &str) -> String {
    format!(
        "backup_{}.{extension}",
        to_ist(at).format("%Y-%m-%d_%H-%M-%S")
    )
}

/// Daily log file name, e.g. `backup_2025-11-29.log`.
#[must_use]
pub fn log_file_name(at: DateTime<Utc>) -> String {
    format!("backup_{}.log", to_ist(at).format("%Y-%m-%d"))
}

/// Extension of a local file, keeping compound archive suffixes intact.
#[must_use]
pub fn extension_of(file_name: &str) -> &str {
    const COMPOUND: &[&str] = &["tar.gz", "tar.bz2", "tar.xz", "tar.zst"];
    let lowered = file_name.to_ascii_lowercase();
    for suffix in COMPOUND {
        if lowered.ends_with(&format!(".{suffix}")) {
            return &file_name[file_name.len() - suffix.len()..];
        }
    }
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext,
        _ => DEFAULT_EXTENSION,
    }
}

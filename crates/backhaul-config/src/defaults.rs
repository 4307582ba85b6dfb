//! Default values applied when optional variables are unset.
//!
//! # Design
//! - Keep every default in one place so the banner and the loader agree.

/// Snapshots kept on the origin after rotation.
pub(crate) const MAX_SERVER_BACKUPS: usize = 2;
/// Frequent copies kept in the primary folder.
pub(crate) const MAX_PRIMARY_BACKUPS: usize = 3;
/// Daily copies kept in the archive folder.
pub(crate) const MAX_ARCHIVE_BACKUPS: usize = 5;
/// Wait before the first status poll.
pub(crate) const INITIAL_DELAY_SECS: u64 = 30;
/// Gap between status polls.
pub(crate) const POLL_INTERVAL_SECS: u64 = 10;
/// Total poll budget.
pub(crate) const POLL_TIMEOUT_SECS: u64 = 900;
/// Window in which a `failed` reading is treated as transient.
pub(crate) const FAILURE_GRACE_SECS: u64 = 60;
/// Minutes between regular cycles.
pub(crate) const INTERVAL_MINUTES: u64 = 20;
/// IST wall-clock time of the daily archive cycle.
pub(crate) const DAILY_AT: &str = "23:59";
/// Staging directory for downloaded snapshots.
pub(crate) const TEMP_DIR: &str = "temp_backups";
/// Directory holding the daily log files.
pub(crate) const LOGS_DIR: &str = "logs";
/// Default log level.
pub(crate) const LOG_LEVEL: &str = "info";
/// Google API host for metadata requests.
pub(crate) const DRIVE_API_URL: &str = "https://www.googleapis.com";
/// Google OAuth token endpoint used for refresh-token grants.
pub(crate) const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

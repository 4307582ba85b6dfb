//! Typed configuration consumed by the orchestrator, scheduler, and adapters.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;
use serde::{Serialize, Serializer};
use url::Url;

/// Credential that never appears in logs or serialised output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a credential.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the raw credential to an adapter.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("***")
    }
}

/// Fully validated runtime configuration.
#[derive(Debug, Clone, Serialize)]
pub struct BackhaulConfig {
    /// Origin panel connection.
    pub panel: PanelConfig,
    /// Storage tier connection and folders.
    pub drive: DriveConfig,
    /// Per-location retention limits.
    pub retention: RetentionConfig,
    /// Status polling budget.
    pub polling: PollingConfig,
    /// Scheduler cadence.
    pub schedule: ScheduleConfig,
    /// Local directories.
    pub paths: PathsConfig,
    /// Logging preferences.
    pub logging: LoggingSettings,
}

impl BackhaulConfig {
    /// Whether daily archive copies are produced.
    #[must_use]
    pub const fn archive_enabled(&self) -> bool {
        self.drive.archive_folder.is_some()
    }
}

/// Pterodactyl panel connection.
#[derive(Debug, Clone, Serialize)]
pub struct PanelConfig {
    /// Panel base URL.
    pub base_url: Url,
    /// Client API key.
    pub api_key: Secret,
    /// Server identifier.
    pub server_id: String,
}

/// Google Drive tier settings.
#[derive(Debug, Clone, Serialize)]
pub struct DriveConfig {
    /// Folder receiving frequent copies.
    pub primary_folder: String,
    /// Folder receiving daily copies; archive is disabled when absent.
    pub archive_folder: Option<String>,
    /// How Drive requests are authorised.
    pub credentials: DriveCredentials,
    /// API host; overridable for tests and proxies.
    pub api_base: Url,
}

/// Drive authorisation material.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriveCredentials {
    /// Pre-issued access token, used until it expires.
    AccessToken {
        /// Bearer token.
        token: Secret,
    },
    /// Refresh-token grant renewed without user interaction.
    Refresh {
        /// OAuth client identifier.
        client_id: String,
        /// OAuth client secret.
        client_secret: Secret,
        /// Long-lived refresh token.
        refresh_token: Secret,
        /// OAuth token endpoint.
        token_url: Url,
    },
}

impl DriveCredentials {
    /// Short label for the startup banner.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AccessToken { .. } => "access_token",
            Self::Refresh { .. } => "refresh_token",
        }
    }
}

/// Retention limits.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RetentionConfig {
    /// Snapshots kept on the origin.
    pub max_server_backups: usize,
    /// Copies kept in the primary folder.
    pub max_primary_backups: usize,
    /// Copies kept in the archive folder.
    pub max_archive_backups: usize,
}

/// Poll loop budget.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PollingConfig {
    /// Wait before the first poll.
    pub initial_delay: Duration,
    /// Gap between polls.
    pub interval: Duration,
    /// Total budget measured after the initial delay.
    pub timeout: Duration,
    /// Window in which a `failed` reading is tolerated.
    pub failure_grace: Duration,
}

/// Scheduler cadence.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScheduleConfig {
    /// Gap between regular cycles.
    pub interval: Duration,
    /// IST wall-clock time of the daily archive cycle.
    pub daily_at: NaiveTime,
}

/// Local directories.
#[derive(Debug, Clone, Serialize)]
pub struct PathsConfig {
    /// Staging directory.
    pub temp_dir: PathBuf,
    /// Log directory.
    pub logs_dir: PathBuf,
}

/// Logging preferences.
#[derive(Debug, Clone, Serialize)]
pub struct LoggingSettings {
    /// Level directive used when `RUST_LOG` is unset.
    pub level: String,
    /// `json` or `pretty`; inferred from the build when absent.
    pub format: Option<String>,
}

//! # Design
//!
//! - One taxonomy shared by the origin client, storage tiers, and the orchestrator.
//! - Constant messages; context travels in fields so tests can match on structure.
//! - Transport failures keep their source without leaking the HTTP client type.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::model::{BackupId, LocationId};

/// Boxed error used to carry adapter-specific sources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias for backup lifecycle operations.
pub type BackupResult<T> = Result<T, BackupError>;

/// Errors raised while creating, relaying, or rotating backups.
#[derive(Debug, Error)]
pub enum BackupError {
    /// Network or protocol failure talking to the origin or a storage tier.
    #[error("remote transport failure")]
    Transport {
        /// Operation identifier.
        operation: &'static str,
        /// Endpoint or resource addressed by the request.
        target: String,
        /// Underlying client error.
        source: BoxError,
    },
    /// Remote system answered with a non-success status.
    #[error("remote returned error status")]
    HttpStatus {
        /// Operation identifier.
        operation: &'static str,
        /// Endpoint or resource addressed by the request.
        target: String,
        /// HTTP status code.
        status: u16,
    },
    /// Download locator requested before the job succeeded.
    #[error("backup is not ready for download")]
    NotReady {
        /// Job that was not yet complete.
        backup_id: BackupId,
    },
    /// Poll budget was exhausted without a terminal status.
    #[error("backup did not complete before the poll timeout")]
    Timeout {
        /// Job being polled.
        backup_id: BackupId,
        /// Time spent polling when the budget ran out.
        elapsed: Duration,
    },
    /// Origin reported a terminal failure.
    #[error("origin reported backup failure")]
    Failed {
        /// Job that failed.
        backup_id: BackupId,
    },
    /// Byte stream interrupted mid-flight.
    #[error("byte transfer interrupted")]
    Transfer {
        /// Side of the transfer that failed.
        operation: &'static str,
        /// Local file involved in the transfer.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Local filesystem failure outside of a transfer.
    #[error("local io failure")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// A retention deletion failed; logged, never fatal.
    #[error("retention deletion failed")]
    Rotation {
        /// Location being rotated.
        location: LocationId,
        /// Name of the artifact that could not be removed.
        artifact: String,
        /// Failure reported by the deletion call.
        source: Box<Self>,
    },
    /// Another backup operation holds the single-flight slot.
    #[error("another backup operation is already running")]
    Busy,
    /// Operation was interrupted by shutdown.
    #[error("backup operation cancelled")]
    Cancelled,
    /// Caller-supplied input failed validation.
    #[error("invalid input")]
    InvalidInput {
        /// Field that failed validation.
        field: &'static str,
        /// Machine-readable reason.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
}

impl BackupError {
    /// Wrap an adapter error as a transport failure.
    pub fn transport(
        operation: &'static str,
        target: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Transport {
            operation,
            target: target.into(),
            source: source.into(),
        }
    }

    /// Build a status failure for a non-success response.
    pub fn http_status(operation: &'static str, target: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            operation,
            target: target.into(),
            status,
        }
    }

    pub(crate) fn transfer(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: io::Error,
    ) -> Self {
        Self::Transfer {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Wrap a local filesystem failure.
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// True for failures talking to a remote system.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::HttpStatus { .. })
    }

    /// True when the remote reported the resource as absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::HttpStatus { status: 404, .. })
    }

    /// Short machine-readable label for stage records and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transport { .. } | Self::HttpStatus { .. } => "transport",
            Self::NotReady { .. } => "not_ready",
            Self::Timeout { .. } => "timeout",
            Self::Failed { .. } => "backup_failed",
            Self::Transfer { .. } => "transfer",
            Self::Io { .. } => "io",
            Self::Rotation { .. } => "rotation",
            Self::Busy => "busy",
            Self::Cancelled => "cancelled",
            Self::InvalidInput { .. } => "invalid_input",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn helpers_preserve_sources() {
        let transport = BackupError::transport("panel.list", "/backups", io::Error::other("reset"));
        assert!(transport.is_transport());
        assert!(transport.source().is_some());

        let transfer = BackupError::transfer("read_source", "staging.tar.gz", io::Error::other("eof"));
        assert_eq!(transfer.kind(), "transfer");
        assert!(transfer.source().is_some());

        let rotation = BackupError::Rotation {
            location: LocationId::new("folder"),
            artifact: "old.tar.gz".into(),
            source: Box::new(BackupError::http_status("drive.delete", "old", 500)),
        };
        assert!(rotation.source().is_some());
        assert!(!rotation.is_transport());
    }

    #[test]
    fn not_found_only_matches_404() {
        assert!(BackupError::http_status("panel.delete", "b", 404).is_not_found());
        assert!(!BackupError::http_status("panel.delete", "b", 500).is_not_found());
        assert!(!BackupError::Busy.is_not_found());
    }
}

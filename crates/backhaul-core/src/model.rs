//! Backup jobs, stored artifacts, and the identifiers that tie them to a location.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BackupError, BackupResult};

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a provider-assigned identifier.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
                formatter.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }
    };
}

opaque_id!(
    /// Identifier assigned by the origin panel when a backup is created.
    BackupId
);
opaque_id!(
    /// Identifier assigned by a storage provider to a stored file.
    ArtifactId
);
opaque_id!(
    /// Folder or slot that owns a set of artifacts.
    LocationId
);

/// Completion state reported by the origin panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    /// Snapshot is still being produced.
    Pending,
    /// Snapshot finished and can be downloaded.
    Succeeded,
    /// Snapshot reported a failure.
    Failed,
}

impl BackupStatus {
    /// Stable label used in logs and stage records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

/// Point-in-time view of one origin snapshot operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupJob {
    /// Origin-assigned identifier; immutable for the life of the job.
    pub id: BackupId,
    /// Status as of the read that produced this value.
    pub status: BackupStatus,
    /// Completion timestamp, only present once the job succeeded.
    pub completed_at: Option<DateTime<Utc>>,
}

impl BackupJob {
    /// Freshly created job that has not reported progress yet.
    #[must_use]
    pub const fn pending(id: BackupId) -> Self {
        Self {
            id,
            status: BackupStatus::Pending,
            completed_at: None,
        }
    }

    /// A job is only downloadable once it succeeded and carries a completion time.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self.status, BackupStatus::Succeeded) && self.completed_at.is_some()
    }
}

/// A file resident at exactly one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Provider identifier used for download and deletion.
    pub id: ArtifactId,
    /// Location that owns the artifact.
    pub location: LocationId,
    /// Display name, unique within the location.
    pub name: String,
    /// Creation time; the only ordering key used by retention.
    pub created_at: DateTime<Utc>,
    /// Size reported by the provider, informational only.
    pub size_bytes: Option<u64>,
}

/// Role a location plays in the backup topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationRole {
    /// Backup slots on the origin panel.
    Origin,
    /// Frequent off-host copies.
    Primary,
    /// Daily off-host copies.
    Archive,
}

impl LocationRole {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Origin => "origin",
            Self::Primary => "primary",
            Self::Archive => "archive",
        }
    }
}

/// A location paired with the maximum number of artifacts it may hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    /// Role of the location.
    pub role: LocationRole,
    /// Provider identifier for the folder or slot.
    pub id: LocationId,
    /// Retention limit enforced after every mutation.
    pub max_count: usize,
}

impl StorageLocation {
    /// Describe a location with its retention limit.
    #[must_use]
    pub fn new(role: LocationRole, id: impl Into<String>, max_count: usize) -> Self {
        Self {
            role,
            id: LocationId::new(id),
            max_count,
        }
    }
}

/// Restricts a snapshot to one origin-relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConstraint {
    path: String,
}

impl BackupConstraint {
    /// Validate an origin-relative path.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::InvalidInput`] when the path is empty or escapes the server root.
    pub fn new(path: &str) -> BackupResult<Self> {
        let trimmed = path.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Err(BackupError::InvalidInput {
                field: "path",
                reason: "empty",
                value: Some(path.to_string()),
            });
        }
        let escapes = Path::new(trimmed)
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
        if escapes {
            return Err(BackupError::InvalidInput {
                field: "path",
                reason: "not_relative",
                value: Some(path.to_string()),
            });
        }
        Ok(Self {
            path: trimmed.to_string(),
        })
    }

    /// Normalised path without leading or trailing separators.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

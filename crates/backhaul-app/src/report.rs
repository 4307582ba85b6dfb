//! Stage trace and terminal outcome returned by every orchestrator operation.

use backhaul_core::{Artifact, BackupError, BackupId, RotationOutcome};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Operation family, used as the metrics `kind` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    /// Snapshot delivered to the primary folder.
    Regular,
    /// Snapshot delivered to the primary and archive folders.
    Archive,
    /// Storage artifact pushed to the origin and unpacked.
    Restore,
    /// Storage artifact pushed to the origin as-is.
    DownloadToOrigin,
    /// Snapshot constrained to one origin path.
    UploadPath,
    /// Existing local file delivered to the primary folder.
    UploadLocal,
}

impl CycleKind {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Archive => "archive",
            Self::Restore => "restore",
            Self::DownloadToOrigin => "download_to_origin",
            Self::UploadPath => "upload_path",
            Self::UploadLocal => "upload_local",
        }
    }
}

/// What started an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// First cycle after process start.
    Startup,
    /// Regular interval tick.
    Interval,
    /// Daily archive tick; waits for the slot instead of being rejected.
    Daily,
    /// Operator command.
    Command,
}

impl Trigger {
    /// Stable label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Interval => "interval",
            Self::Daily => "daily",
            Self::Command => "command",
        }
    }

    pub(crate) const fn queues(self) -> bool {
        matches!(self, Self::Daily)
    }
}

/// Step of an operation recorded in the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Make room on the origin before creating a snapshot.
    RotateOrigin,
    /// Start the snapshot.
    Create,
    /// Wait for the snapshot to finish.
    Poll,
    /// Stream the snapshot into staging.
    Download,
    /// Copy into the primary folder.
    UploadPrimary,
    /// Enforce the primary retention limit.
    RotatePrimary,
    /// Copy into the archive folder.
    UploadArchive,
    /// Enforce the archive retention limit.
    RotateArchive,
    /// Stream a storage artifact into staging.
    FetchArtifact,
    /// Push staging content into the origin file area.
    PushOrigin,
    /// Unpack the pushed archive on the origin.
    Decompress,
    /// Remove the pushed archive from the origin.
    DeleteOriginFile,
    /// Delete the origin snapshot job.
    DeleteRemote,
    /// Remove the staging file.
    CleanLocal,
}

impl Stage {
    /// Stable label for logs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RotateOrigin => "rotate_origin",
            Self::Create => "create",
            Self::Poll => "poll",
            Self::Download => "download",
            Self::UploadPrimary => "upload_primary",
            Self::RotatePrimary => "rotate_primary",
            Self::UploadArchive => "upload_archive",
            Self::RotateArchive => "rotate_archive",
            Self::FetchArtifact => "fetch_artifact",
            Self::PushOrigin => "push_origin",
            Self::Decompress => "decompress",
            Self::DeleteOriginFile => "delete_origin_file",
            Self::DeleteRemote => "delete_remote",
            Self::CleanLocal => "clean_local",
        }
    }
}

/// Result of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// Stage finished.
    Completed,
    /// Stage failed; fatal unless it is a rotation or cleanup stage.
    Failed,
    /// Stage did not apply to this operation.
    Skipped,
}

impl StageStatus {
    /// Stable label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// One entry in the stage trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRecord {
    /// Stage that ran.
    pub stage: Stage,
    /// How it ended.
    pub status: StageStatus,
    /// Optional short detail such as an artifact name or error kind.
    pub detail: Option<String>,
    /// When the record was written.
    pub at: DateTime<Utc>,
}

/// Bounded trace plus terminal outcome of an orchestrator operation.
#[derive(Debug)]
pub struct CycleReport {
    /// Correlates log lines of one operation.
    pub id: Uuid,
    /// Operation family.
    pub kind: CycleKind,
    /// What started the operation.
    pub trigger: Trigger,
    /// Start time, also used for artifact names.
    pub started_at: DateTime<Utc>,
    /// Completion time including compensation.
    pub finished_at: DateTime<Utc>,
    /// Origin job created by the operation, if any.
    pub backup_id: Option<BackupId>,
    /// Artifacts written to storage.
    pub uploaded: Vec<Artifact>,
    /// Rotations applied along the way.
    pub rotations: Vec<RotationOutcome>,
    /// Ordered stage trace.
    pub stages: Vec<StageRecord>,
    /// Failure that ended the operation; `None` on success.
    pub error: Option<BackupError>,
}

impl CycleReport {
    /// Whether the operation finished without a fatal error.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// First record for `stage`, if it ran.
    #[must_use]
    pub fn stage(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.iter().find(|record| record.stage == stage)
    }

    /// One-line operator summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let uploaded = self
            .uploaded
            .iter()
            .map(|artifact| format!("{}/{}", artifact.location, artifact.name))
            .collect::<Vec<_>>()
            .join(", ");
        match &self.error {
            None if uploaded.is_empty() => format!("{} succeeded", self.kind.as_str()),
            None => format!("{} succeeded: {uploaded}", self.kind.as_str()),
            Some(err) => format!("{} failed ({}): {err}", self.kind.as_str(), err.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(error: Option<BackupError>) -> CycleReport {
        CycleReport {
            id: Uuid::nil(),
            kind: CycleKind::Regular,
            trigger: Trigger::Command,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            backup_id: None,
            uploaded: Vec::new(),
            rotations: Vec::new(),
            stages: vec![StageRecord {
                stage: Stage::Create,
                status: StageStatus::Completed,
                detail: Some("b-1".into()),
                at: Utc::now(),
            }],
            error,
        }
    }

    #[test]
    fn summary_reflects_outcome() {
        assert_eq!(report(None).summary(), "regular succeeded");
        let failed = report(Some(BackupError::Busy));
        assert!(!failed.is_success());
        assert!(failed.summary().starts_with("regular failed (busy)"));
    }

    #[test]
    fn stage_lookup_finds_first_record() {
        let report = report(None);
        assert_eq!(
            report.stage(Stage::Create).map(|record| record.status),
            Some(StageStatus::Completed)
        );
        assert!(report.stage(Stage::Poll).is_none());
    }

    #[test]
    fn only_daily_ticks_queue() {
        assert!(Trigger::Daily.queues());
        assert!(!Trigger::Interval.queues());
        assert!(!Trigger::Command.queues());
    }
}

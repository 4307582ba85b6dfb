//! Backup lifecycle orchestration.
//!
//! # Design
//! - Every operation runs through one path: admission, body, finalize, report.
//! - Admission is single-flight; overlapping requests get `Busy` unless the trigger queues.
//! - The body races against shutdown; finalize always runs afterwards, even when cancelled.
//! - Finalize deletes the origin job (if one was created) and the staging file, independently.
//! - A fresh upload replaces older artifacts of the same name before rotation runs.
//! - Rotation and cleanup failures are logged and traced but never change the outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use backhaul_config::{BackhaulConfig, PollingConfig};
use backhaul_core::naming::{self, DEFAULT_EXTENSION};
use backhaul_core::transfer::open_stream;
use backhaul_core::{
    Artifact, ArtifactId, BackupConstraint, BackupError, BackupId, BackupResult, ByteStream,
    LocationRole, OriginBackups, RotationOutcome, StagingFile, StorageLocation, StorageTier, prune,
};
use backhaul_telemetry::Metrics;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::poll::wait_for_completion;
use crate::report::{CycleKind, CycleReport, Stage, StageRecord, StageStatus, Trigger};

/// Static inputs the orchestrator needs from configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Status polling budget.
    pub polling: PollingConfig,
    /// Maximum backups kept on the origin, including the one about to be created.
    pub origin_limit: usize,
    /// Frequent-copy folder.
    pub primary: StorageLocation,
    /// Daily-copy folder; `None` disables archive delivery.
    pub archive: Option<StorageLocation>,
    /// Directory holding staging files.
    pub staging_dir: PathBuf,
}

impl OrchestratorSettings {
    /// Derive orchestrator settings from the validated configuration.
    #[must_use]
    pub fn from_config(config: &BackhaulConfig) -> Self {
        Self {
            polling: config.polling.clone(),
            origin_limit: config.retention.max_server_backups,
            primary: StorageLocation::new(
                LocationRole::Primary,
                config.drive.primary_folder.clone(),
                config.retention.max_primary_backups,
            ),
            archive: config.drive.archive_folder.as_ref().map(|folder| {
                StorageLocation::new(
                    LocationRole::Archive,
                    folder.clone(),
                    config.retention.max_archive_backups,
                )
            }),
            staging_dir: config.paths.temp_dir.clone(),
        }
    }
}

/// Work carried out under the single-flight slot.
#[derive(Debug)]
enum Operation {
    Snapshot {
        archive: bool,
        constraint: Option<BackupConstraint>,
    },
    Restore {
        artifact: ArtifactId,
        unpack: bool,
    },
    UploadLocal {
        path: PathBuf,
    },
}

/// Mutable state shared between the body and finalize.
#[derive(Debug)]
struct CycleState {
    started_at: DateTime<Utc>,
    job: Option<BackupId>,
    staging: Option<StagingFile>,
    uploaded: Vec<Artifact>,
    rotations: Vec<RotationOutcome>,
    stages: Vec<StageRecord>,
}

impl CycleState {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            job: None,
            staging: None,
            uploaded: Vec::new(),
            rotations: Vec::new(),
            stages: Vec::new(),
        }
    }

    fn record(&mut self, stage: Stage, status: StageStatus, detail: Option<String>) {
        debug!(
            stage = stage.as_str(),
            status = status.as_str(),
            detail = detail.as_deref().unwrap_or(""),
            "stage recorded"
        );
        self.stages.push(StageRecord {
            stage,
            status,
            detail,
            at: Utc::now(),
        });
    }

    fn completed(&mut self, stage: Stage, detail: impl Into<String>) {
        self.record(stage, StageStatus::Completed, Some(detail.into()));
    }
}

/// Record a fatal stage failure and pass the error through.
fn failed(state: &mut CycleState, stage: Stage) -> impl FnOnce(BackupError) -> BackupError + '_ {
    move |err| {
        state.record(stage, StageStatus::Failed, Some(err.kind().to_string()));
        err
    }
}

async fn open_staging(state: &CycleState) -> BackupResult<(ByteStream, u64)> {
    match state.staging.as_ref() {
        Some(staging) => staging.open().await,
        None => Err(BackupError::InvalidInput {
            field: "staging",
            reason: "missing",
            value: None,
        }),
    }
}

/// Drives backups from the origin into storage and back.
pub struct Orchestrator {
    origin: Arc<dyn OriginBackups>,
    storage: Arc<dyn StorageTier>,
    settings: OrchestratorSettings,
    metrics: Metrics,
    shutdown: CancellationToken,
    slot: Mutex<()>,
}

impl Orchestrator {
    /// Assemble an orchestrator; `shutdown` cancels whatever operation is in flight.
    #[must_use]
    pub fn new(
        origin: Arc<dyn OriginBackups>,
        storage: Arc<dyn StorageTier>,
        settings: OrchestratorSettings,
        metrics: Metrics,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            origin,
            storage,
            settings,
            metrics,
            shutdown,
            slot: Mutex::new(()),
        }
    }

    /// Metrics registry updated by every operation.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Settings in effect.
    #[must_use]
    pub const fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Whether archive delivery is configured.
    #[must_use]
    pub const fn archive_enabled(&self) -> bool {
        self.settings.archive.is_some()
    }

    /// Run one snapshot cycle. `archive` also delivers to the archive folder when configured.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Busy`] when another operation holds the slot and the trigger
    /// does not queue, or [`BackupError::Cancelled`] when shutdown fires while queued. Every
    /// other failure is carried in the report.
    pub async fn run_cycle(&self, archive: bool, trigger: Trigger) -> BackupResult<CycleReport> {
        let kind = if archive {
            CycleKind::Archive
        } else {
            CycleKind::Regular
        };
        self.execute(
            kind,
            trigger,
            Operation::Snapshot {
                archive,
                constraint: None,
            },
        )
        .await
    }

    /// Snapshot only `constraint` and deliver it to the primary folder.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Busy`] when another operation is running.
    pub async fn upload_path(
        &self,
        constraint: BackupConstraint,
        trigger: Trigger,
    ) -> BackupResult<CycleReport> {
        self.execute(
            CycleKind::UploadPath,
            trigger,
            Operation::Snapshot {
                archive: false,
                constraint: Some(constraint),
            },
        )
        .await
    }

    /// Push a stored artifact to the origin and unpack it in place.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Busy`] when another operation is running.
    pub async fn restore(&self, artifact: ArtifactId, trigger: Trigger) -> BackupResult<CycleReport> {
        self.execute(
            CycleKind::Restore,
            trigger,
            Operation::Restore {
                artifact,
                unpack: true,
            },
        )
        .await
    }

    /// Push a stored artifact to the origin without unpacking it.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Busy`] when another operation is running.
    pub async fn download_to_origin(
        &self,
        artifact: ArtifactId,
        trigger: Trigger,
    ) -> BackupResult<CycleReport> {
        self.execute(
            CycleKind::DownloadToOrigin,
            trigger,
            Operation::Restore {
                artifact,
                unpack: false,
            },
        )
        .await
    }

    /// Deliver an existing local file to the primary folder; the file is left in place.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Busy`] when another operation is running.
    pub async fn upload_local(&self, path: PathBuf, trigger: Trigger) -> BackupResult<CycleReport> {
        self.execute(CycleKind::UploadLocal, trigger, Operation::UploadLocal { path })
            .await
    }

    /// List artifacts held by one location, newest first. Does not take the slot.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::InvalidInput`] for the archive role when archives are disabled,
    /// or the listing failure.
    pub async fn list(&self, role: LocationRole) -> BackupResult<Vec<Artifact>> {
        let mut artifacts = match role {
            LocationRole::Origin => self.origin.list().await?,
            LocationRole::Primary => self.storage.list(&self.settings.primary.id).await?,
            LocationRole::Archive => {
                let archive = self.settings.archive.as_ref().ok_or(BackupError::InvalidInput {
                    field: "location",
                    reason: "archive_disabled",
                    value: None,
                })?;
                self.storage.list(&archive.id).await?
            }
        };
        artifacts.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        Ok(artifacts)
    }

    async fn admit(&self, trigger: Trigger) -> BackupResult<MutexGuard<'_, ()>> {
        if !trigger.queues() {
            return self.slot.try_lock().map_err(|_| BackupError::Busy);
        }
        tokio::select! {
            guard = self.slot.lock() => Ok(guard),
            () = self.shutdown.cancelled() => Err(BackupError::Cancelled),
        }
    }

    async fn execute(
        &self,
        kind: CycleKind,
        trigger: Trigger,
        operation: Operation,
    ) -> BackupResult<CycleReport> {
        let _slot = self.admit(trigger).await.inspect_err(|err| {
            warn!(
                kind = kind.as_str(),
                trigger = trigger.as_str(),
                error = %err,
                "operation not started"
            );
        })?;

        let id = Uuid::new_v4();
        let archive = matches!(operation, Operation::Snapshot { archive: true, .. });
        let span = info_span!(
            "backup_cycle",
            cycle_id = %id,
            kind = kind.as_str(),
            archive,
            trigger = trigger.as_str()
        );
        self.run_admitted(id, kind, trigger, operation)
            .instrument(span)
            .await
    }

    async fn run_admitted(
        &self,
        id: Uuid,
        kind: CycleKind,
        trigger: Trigger,
        operation: Operation,
    ) -> BackupResult<CycleReport> {
        self.metrics.set_in_flight(true);
        info!("operation started");

        let mut state = CycleState::new();
        let outcome = {
            let body = self.body(&operation, &mut state);
            tokio::select! {
                result = body => result,
                () = self.shutdown.cancelled() => Err(BackupError::Cancelled),
            }
        };
        self.finalize(&mut state).await;

        let report = CycleReport {
            id,
            kind,
            trigger,
            started_at: state.started_at,
            finished_at: Utc::now(),
            backup_id: state.job.take(),
            uploaded: state.uploaded,
            rotations: state.rotations,
            stages: state.stages,
            error: outcome.err(),
        };
        self.observe(&report);
        Ok(report)
    }

    fn observe(&self, report: &CycleReport) {
        self.metrics.set_in_flight(false);
        match &report.error {
            None => {
                self.metrics.inc_cycle(report.kind.as_str(), "succeeded");
                self.metrics.mark_success(report.finished_at.timestamp());
                info!(
                    stages = report.stages.len(),
                    uploaded = report.uploaded.len(),
                    "operation succeeded"
                );
            }
            Some(BackupError::Cancelled) => {
                self.metrics.inc_cycle(report.kind.as_str(), "cancelled");
                warn!(stages = report.stages.len(), "operation cancelled");
            }
            Some(err) => {
                self.metrics.inc_cycle(report.kind.as_str(), "failed");
                error!(
                    error = %err,
                    error_kind = err.kind(),
                    stages = report.stages.len(),
                    "operation failed"
                );
            }
        }
    }

    async fn body(&self, operation: &Operation, state: &mut CycleState) -> BackupResult<()> {
        match operation {
            Operation::Snapshot {
                archive,
                constraint,
            } => self.snapshot(state, constraint.as_ref(), *archive).await,
            Operation::Restore { artifact, unpack } => {
                self.push_to_origin(state, artifact, *unpack).await
            }
            Operation::UploadLocal { path } => self.deliver_local(state, path).await,
        }
    }

    async fn snapshot(
        &self,
        state: &mut CycleState,
        constraint: Option<&BackupConstraint>,
        archive: bool,
    ) -> BackupResult<()> {
        self.make_room_on_origin(state).await?;

        let job = self
            .origin
            .create(constraint)
            .await
            .map_err(failed(state, Stage::Create))?;
        state.job = Some(job.id.clone());
        state.completed(Stage::Create, job.id.as_str());
        info!(
            backup_id = %job.id,
            constraint = constraint.map(BackupConstraint::path),
            "snapshot created"
        );

        let finished = wait_for_completion(self.origin.as_ref(), &job.id, &self.settings.polling)
            .await
            .map_err(failed(state, Stage::Poll))?;
        state.completed(Stage::Poll, finished.status.as_str());

        self.download_snapshot(state, &job.id).await?;

        let at = state.started_at;
        let primary = self.settings.primary.clone();
        let name = naming::primary_name(at, DEFAULT_EXTENSION);
        let stored = self
            .deliver(state, &primary, &name, Stage::UploadPrimary)
            .await?;
        self.rotate_storage(state, &primary, &stored, Stage::RotatePrimary)
            .await;

        if !archive {
            return Ok(());
        }
        match self.settings.archive.clone() {
            Some(location) => {
                let name = naming::archive_name(at, DEFAULT_EXTENSION);
                let stored = self
                    .deliver(state, &location, &name, Stage::UploadArchive)
                    .await?;
                self.rotate_storage(state, &location, &stored, Stage::RotateArchive)
                    .await;
            }
            None => {
                warn!("archive requested but no archive folder is configured");
                state.record(
                    Stage::UploadArchive,
                    StageStatus::Skipped,
                    Some("archive_disabled".into()),
                );
            }
        }
        Ok(())
    }

    async fn make_room_on_origin(&self, state: &mut CycleState) -> BackupResult<()> {
        let location = self.origin.location();
        let listed = self
            .origin
            .list()
            .await
            .map_err(failed(state, Stage::RotateOrigin))?;
        let origin = self.origin.as_ref();
        let outcome = prune(
            &location,
            &listed,
            self.settings.origin_limit.saturating_sub(1),
            move |artifact| async move {
                origin
                    .delete(&BackupId::new(artifact.id.as_str()))
                    .await
            },
        )
        .await;
        self.record_rotation(state, Stage::RotateOrigin, LocationRole::Origin, 0, outcome);
        Ok(())
    }

    async fn download_snapshot(&self, state: &mut CycleState, id: &BackupId) -> BackupResult<()> {
        let locator = self
            .origin
            .download_locator(id)
            .await
            .map_err(failed(state, Stage::Download))?;
        let source = self
            .origin
            .fetch(&locator)
            .await
            .map_err(failed(state, Stage::Download))?;
        let name = naming::staging_name(state.started_at, DEFAULT_EXTENSION);
        let written = self
            .stage_stream(state, Stage::Download, &name, source)
            .await?;
        self.metrics.add_bytes("download", written);
        state.completed(Stage::Download, format!("{written} bytes"));
        info!(backup_id = %id, bytes = written, "snapshot staged");
        Ok(())
    }

    async fn stage_stream(
        &self,
        state: &mut CycleState,
        stage: Stage,
        name: &str,
        source: ByteStream,
    ) -> BackupResult<u64> {
        let dir = &self.settings.staging_dir;
        if let Err(err) = tokio::fs::create_dir_all(dir).await {
            let err = BackupError::io("create_staging_dir", dir, err);
            state.record(stage, StageStatus::Failed, Some(err.kind().into()));
            return Err(err);
        }
        let filled = state
            .staging
            .insert(StagingFile::new(dir, name))
            .fill(source)
            .await;
        filled.map_err(failed(state, stage))
    }

    async fn deliver(
        &self,
        state: &mut CycleState,
        location: &StorageLocation,
        name: &str,
        stage: Stage,
    ) -> BackupResult<Artifact> {
        let opened = open_staging(state).await;
        let (body, len) = opened.map_err(failed(state, stage))?;
        let artifact = self
            .storage
            .upload(&location.id, name, body, len)
            .await
            .map_err(failed(state, stage))?;
        self.metrics.add_bytes("upload", len);
        info!(
            location = location.role.as_str(),
            artifact = %artifact.name,
            bytes = len,
            "artifact uploaded"
        );
        state.completed(stage, artifact.name.clone());
        state.uploaded.push(artifact.clone());
        Ok(artifact)
    }

    async fn rotate_storage(
        &self,
        state: &mut CycleState,
        location: &StorageLocation,
        fresh: &Artifact,
        stage: Stage,
    ) {
        let listed = match self.storage.list(&location.id).await {
            Ok(listed) => listed,
            Err(err) => {
                warn!(
                    location = location.role.as_str(),
                    error = %err,
                    "listing for rotation failed; quota enforced next cycle"
                );
                state.record(stage, StageStatus::Failed, Some(err.kind().into()));
                return;
            }
        };
        let (replaced, listed) = self.replace_same_named(location, fresh, listed).await;
        let storage = self.storage.as_ref();
        let outcome = prune(&location.id, &listed, location.max_count, move |artifact| async move {
            storage.delete(&artifact.id).await
        })
        .await;
        self.record_rotation(state, stage, location.role, replaced, outcome);
    }

    /// Delete older artifacts sharing `fresh`'s name; returns the count removed and the
    /// listing without them. Survivors of a failed delete stay in the listing.
    async fn replace_same_named(
        &self,
        location: &StorageLocation,
        fresh: &Artifact,
        listed: Vec<Artifact>,
    ) -> (usize, Vec<Artifact>) {
        let (stale, mut kept): (Vec<Artifact>, Vec<Artifact>) = listed
            .into_iter()
            .partition(|artifact| artifact.name == fresh.name && artifact.id != fresh.id);
        let mut replaced = 0;
        for artifact in stale {
            match self.storage.delete(&artifact.id).await {
                Ok(()) => {
                    replaced += 1;
                    self.metrics
                        .inc_rotation_deletion(location.role.as_str(), "replaced");
                    info!(
                        location = location.role.as_str(),
                        artifact = %artifact.name,
                        replaced_id = %artifact.id,
                        "replaced same-named artifact"
                    );
                }
                Err(err) => {
                    self.metrics
                        .inc_rotation_deletion(location.role.as_str(), "failed");
                    warn!(
                        location = location.role.as_str(),
                        artifact = %artifact.name,
                        error = %err,
                        "failed to replace same-named artifact"
                    );
                    kept.push(artifact);
                }
            }
        }
        (replaced, kept)
    }

    fn record_rotation(
        &self,
        state: &mut CycleState,
        stage: Stage,
        role: LocationRole,
        replaced: usize,
        outcome: RotationOutcome,
    ) {
        for _ in &outcome.deleted {
            self.metrics.inc_rotation_deletion(role.as_str(), "deleted");
        }
        for _ in &outcome.failures {
            self.metrics.inc_rotation_deletion(role.as_str(), "failed");
        }
        let detail = format!(
            "deleted {} of {}, {} failed, {replaced} replaced",
            outcome.deleted.len(),
            outcome.observed,
            outcome.failures.len()
        );
        let status = if outcome.failures.is_empty() {
            StageStatus::Completed
        } else {
            StageStatus::Failed
        };
        state.record(stage, status, Some(detail));
        state.rotations.push(outcome);
    }

    async fn push_to_origin(
        &self,
        state: &mut CycleState,
        artifact: &ArtifactId,
        unpack: bool,
    ) -> BackupResult<()> {
        let stored = self
            .storage
            .metadata(artifact)
            .await
            .map_err(failed(state, Stage::FetchArtifact))?;
        let source = self
            .storage
            .download(artifact)
            .await
            .map_err(failed(state, Stage::FetchArtifact))?;
        let extension = naming::extension_of(&stored.name);
        let name = naming::staging_name(state.started_at, extension);
        let written = self
            .stage_stream(state, Stage::FetchArtifact, &name, source)
            .await?;
        self.metrics.add_bytes("download", written);
        state.completed(Stage::FetchArtifact, stored.name.clone());

        let locator = self
            .origin
            .upload_locator()
            .await
            .map_err(failed(state, Stage::PushOrigin))?;
        let opened = open_staging(state).await;
        let (body, len) = opened.map_err(failed(state, Stage::PushOrigin))?;
        self.origin
            .upload_file(&locator, &stored.name, body, len)
            .await
            .map_err(failed(state, Stage::PushOrigin))?;
        self.metrics.add_bytes("upload", len);
        state.completed(Stage::PushOrigin, stored.name.clone());
        info!(artifact = %stored.name, bytes = len, "artifact pushed to origin");

        if !unpack {
            return Ok(());
        }
        self.origin
            .decompress(&stored.name)
            .await
            .map_err(failed(state, Stage::Decompress))?;
        state.completed(Stage::Decompress, stored.name.clone());
        info!(artifact = %stored.name, "archive unpacked on origin");

        match self.origin.delete_file(&stored.name).await {
            Ok(()) => state.completed(Stage::DeleteOriginFile, stored.name.clone()),
            Err(err) => {
                warn!(
                    artifact = %stored.name,
                    error = %err,
                    "failed to remove uploaded archive from origin"
                );
                state.record(
                    Stage::DeleteOriginFile,
                    StageStatus::Failed,
                    Some(err.kind().into()),
                );
            }
        }
        Ok(())
    }

    async fn deliver_local(&self, state: &mut CycleState, path: &Path) -> BackupResult<()> {
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            let err = BackupError::InvalidInput {
                field: "file",
                reason: "no_file_name",
                value: Some(path.display().to_string()),
            };
            state.record(Stage::UploadPrimary, StageStatus::Failed, Some(err.kind().into()));
            return Err(err);
        };
        let (body, len) = open_stream(path)
            .await
            .map_err(failed(state, Stage::UploadPrimary))?;
        let primary = self.settings.primary.clone();
        let name = naming::primary_name(state.started_at, naming::extension_of(file_name));
        let artifact = self
            .storage
            .upload(&primary.id, &name, body, len)
            .await
            .map_err(failed(state, Stage::UploadPrimary))?;
        self.metrics.add_bytes("upload", len);
        info!(
            source = %path.display(),
            artifact = %artifact.name,
            bytes = len,
            "local file uploaded"
        );
        state.completed(Stage::UploadPrimary, artifact.name.clone());
        state.uploaded.push(artifact.clone());
        self.rotate_storage(state, &primary, &artifact, Stage::RotatePrimary)
            .await;
        Ok(())
    }

    async fn finalize(&self, state: &mut CycleState) {
        if let Some(id) = state.job.clone() {
            match self.origin.delete(&id).await {
                Ok(()) => state.completed(Stage::DeleteRemote, id.as_str()),
                Err(err) if err.is_not_found() => {
                    debug!(backup_id = %id, "origin job already gone");
                    state.completed(Stage::DeleteRemote, id.as_str());
                }
                Err(err) => {
                    warn!(backup_id = %id, error = %err, "failed to delete origin job");
                    state.record(
                        Stage::DeleteRemote,
                        StageStatus::Failed,
                        Some(err.kind().into()),
                    );
                }
            }
        }
        if let Some(staging) = state.staging.take() {
            let path = staging.path().display().to_string();
            match staging.discard().await {
                Ok(_) => state.completed(Stage::CleanLocal, path),
                Err(err) => {
                    warn!(path = %path, error = %err, "failed to remove staging file");
                    state.record(Stage::CleanLocal, StageStatus::Failed, Some(err.kind().into()));
                }
            }
        }
    }
}

//! Restore, push-to-origin, local upload, and listing operations.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use backhaul_app::{CycleKind, Orchestrator, OrchestratorSettings, Stage, StageStatus, Trigger};
use backhaul_config::PollingConfig;
use backhaul_core::{ArtifactId, BackupError, LocationRole, StorageLocation};
use backhaul_telemetry::Metrics;
use backhaul_test_support::fixtures::artifact;
use backhaul_test_support::{MemoryOrigin, MemoryStorage, OriginCall};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const WORLD: &[u8] = b"world-archive-bytes";

fn orchestrator(
    temp: &TempDir,
    origin: &Arc<MemoryOrigin>,
    storage: &Arc<MemoryStorage>,
) -> Result<Orchestrator> {
    let settings = OrchestratorSettings {
        polling: PollingConfig {
            initial_delay: Duration::ZERO,
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(900),
            failure_grace: Duration::from_secs(60),
        },
        origin_limit: 2,
        primary: StorageLocation::new(LocationRole::Primary, "primary", 3),
        archive: None,
        staging_dir: temp.path().join("staging"),
    };
    Ok(Orchestrator::new(
        Arc::clone(origin) as _,
        Arc::clone(storage) as _,
        settings,
        Metrics::new()?,
        CancellationToken::new(),
    ))
}

fn staging_files(temp: &TempDir) -> usize {
    std::fs::read_dir(temp.path().join("staging")).map_or(0, Iterator::count)
}

fn stored_world() -> MemoryStorage {
    MemoryStorage::new().with_artifact(artifact("a1", "primary", 0), WORLD)
}

#[tokio::test]
async fn restore_pushes_unpacks_and_removes_the_archive() -> Result<()> {
    let temp = TempDir::new()?;
    let origin = Arc::new(MemoryOrigin::new());
    let storage = Arc::new(stored_world());
    let orchestrator = orchestrator(&temp, &origin, &storage)?;

    let report = orchestrator
        .restore(ArtifactId::new("a1"), Trigger::Command)
        .await?;

    assert!(report.is_success(), "{}", report.summary());
    assert_eq!(report.kind, CycleKind::Restore);
    let calls = origin.calls();
    assert!(calls.contains(&OriginCall::UploadFile {
        name: "a1.tar.gz".into(),
        content: WORLD.to_vec(),
    }));
    assert!(calls.contains(&OriginCall::Decompress("a1.tar.gz".into())));
    assert!(calls.contains(&OriginCall::DeleteFile("a1.tar.gz".into())));
    assert!(origin.files().is_empty());
    assert!(origin.deletions().is_empty(), "no origin job was created");
    assert_eq!(staging_files(&temp), 0);
    Ok(())
}

#[tokio::test]
async fn download_to_origin_leaves_the_archive_packed() -> Result<()> {
    let temp = TempDir::new()?;
    let origin = Arc::new(MemoryOrigin::new());
    let storage = Arc::new(stored_world());
    let orchestrator = orchestrator(&temp, &origin, &storage)?;

    let report = orchestrator
        .download_to_origin(ArtifactId::new("a1"), Trigger::Command)
        .await?;

    assert!(report.is_success());
    assert_eq!(origin.files().get("a1.tar.gz").map(Vec::as_slice), Some(WORLD));
    assert!(report.stage(Stage::Decompress).is_none());
    assert_eq!(staging_files(&temp), 0);
    Ok(())
}

#[tokio::test]
async fn restore_of_unknown_artifact_fails_cleanly() -> Result<()> {
    let temp = TempDir::new()?;
    let origin = Arc::new(MemoryOrigin::new());
    let storage = Arc::new(stored_world());
    let orchestrator = orchestrator(&temp, &origin, &storage)?;

    let report = orchestrator
        .restore(ArtifactId::new("missing"), Trigger::Command)
        .await?;

    assert!(matches!(
        report.error,
        Some(BackupError::HttpStatus { status: 404, .. })
    ));
    assert!(origin.calls().is_empty());
    assert_eq!(staging_files(&temp), 0);
    Ok(())
}

#[tokio::test]
async fn failed_unpack_still_removes_staging() -> Result<()> {
    let temp = TempDir::new()?;
    let origin = Arc::new(MemoryOrigin::new().failing("decompress"));
    let storage = Arc::new(stored_world());
    let orchestrator = orchestrator(&temp, &origin, &storage)?;

    let report = orchestrator
        .restore(ArtifactId::new("a1"), Trigger::Command)
        .await?;

    assert!(!report.is_success());
    assert_eq!(
        report.stage(Stage::Decompress).map(|record| record.status),
        Some(StageStatus::Failed)
    );
    assert_eq!(staging_files(&temp), 0);
    Ok(())
}

#[tokio::test]
async fn failed_push_to_origin_still_removes_staging() -> Result<()> {
    let temp = TempDir::new()?;
    let origin = Arc::new(MemoryOrigin::new().failing("upload_file"));
    let storage = Arc::new(stored_world());
    let orchestrator = orchestrator(&temp, &origin, &storage)?;

    let report = orchestrator
        .restore(ArtifactId::new("a1"), Trigger::Command)
        .await?;

    assert!(matches!(
        report.error,
        Some(BackupError::HttpStatus { status: 500, .. })
    ));
    assert_eq!(
        report.stage(Stage::PushOrigin).map(|record| record.status),
        Some(StageStatus::Failed)
    );
    assert!(report.stage(Stage::Decompress).is_none());
    assert_eq!(
        report.stage(Stage::CleanLocal).map(|record| record.status),
        Some(StageStatus::Completed)
    );
    assert_eq!(staging_files(&temp), 0);
    assert!(origin.files().is_empty());
    Ok(())
}

#[tokio::test]
async fn upload_local_keeps_the_source_file() -> Result<()> {
    let temp = TempDir::new()?;
    let origin = Arc::new(MemoryOrigin::new());
    let storage = Arc::new(MemoryStorage::new());
    let orchestrator = orchestrator(&temp, &origin, &storage)?;
    let source = temp.path().join("world.zip");
    std::fs::write(&source, WORLD)?;

    let report = orchestrator
        .upload_local(source.clone(), Trigger::Command)
        .await?;

    assert!(report.is_success());
    let names = storage.names("primary");
    assert_eq!(names.len(), 1);
    assert!(names[0].ends_with(".zip"));
    assert_eq!(storage.content("primary", &names[0]).as_deref(), Some(WORLD));
    assert!(Path::new(&source).exists());
    assert!(origin.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn upload_local_reports_missing_files() -> Result<()> {
    let temp = TempDir::new()?;
    let origin = Arc::new(MemoryOrigin::new());
    let storage = Arc::new(MemoryStorage::new());
    let orchestrator = orchestrator(&temp, &origin, &storage)?;

    let report = orchestrator
        .upload_local(temp.path().join("absent.tar.gz"), Trigger::Command)
        .await?;

    assert!(matches!(report.error, Some(BackupError::Io { .. })));
    assert_eq!(storage.uploads(), 0);
    Ok(())
}

#[tokio::test]
async fn listing_is_newest_first_and_archive_requires_a_folder() -> Result<()> {
    let temp = TempDir::new()?;
    let origin = Arc::new(MemoryOrigin::new());
    let storage = Arc::new(
        MemoryStorage::new()
            .with_artifact(artifact("old", "primary", 0), b"o")
            .with_artifact(artifact("new", "primary", 600), b"n"),
    );
    let orchestrator = orchestrator(&temp, &origin, &storage)?;

    let listed = orchestrator.list(LocationRole::Primary).await?;
    let ids: Vec<&str> = listed.iter().map(|artifact| artifact.id.as_str()).collect();
    assert_eq!(ids, vec!["new", "old"]);

    assert!(matches!(
        orchestrator.list(LocationRole::Archive).await,
        Err(BackupError::InvalidInput {
            reason: "archive_disabled",
            ..
        })
    ));
    assert!(orchestrator.list(LocationRole::Origin).await?.is_empty());
    Ok(())
}

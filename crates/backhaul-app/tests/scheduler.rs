//! Scheduler ticks and operator command dispatch.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use backhaul_app::commands::{Command, execute, handle_line, read_commands};
use backhaul_app::scheduler::Scheduler;
use backhaul_app::{AppError, Orchestrator, OrchestratorSettings};
use backhaul_config::PollingConfig;
use backhaul_core::{BackupError, LocationRole, StorageLocation};
use backhaul_telemetry::Metrics;
use backhaul_test_support::{MemoryOrigin, MemoryStorage, OriginCall};
use chrono::NaiveTime;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn build(
    temp: &TempDir,
    origin: &Arc<MemoryOrigin>,
    storage: &Arc<MemoryStorage>,
    shutdown: &CancellationToken,
) -> Result<Arc<Orchestrator>> {
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
    Ok(Arc::new(Orchestrator::new(
        Arc::clone(origin) as _,
        Arc::clone(storage) as _,
        settings,
        Metrics::new()?,
        shutdown.clone(),
    )))
}

fn creates(origin: &MemoryOrigin) -> usize {
    origin
        .calls()
        .iter()
        .filter(|call| matches!(call, OriginCall::Create(_)))
        .count()
}

fn midnight() -> Result<NaiveTime> {
    NaiveTime::from_hms_opt(23, 59, 0).ok_or_else(|| anyhow::anyhow!("invalid time"))
}

#[tokio::test(start_paused = true)]
async fn runs_on_startup_and_every_interval_until_shutdown() -> Result<()> {
    let temp = TempDir::new()?;
    let origin = Arc::new(MemoryOrigin::new());
    let storage = Arc::new(MemoryStorage::new());
    let shutdown = CancellationToken::new();
    let orchestrator = build(&temp, &origin, &storage, &shutdown)?;

    let scheduler = Scheduler::new(orchestrator, Duration::from_secs(20 * 60), midnight()?);
    let running = tokio::spawn(scheduler.run(shutdown.clone()));
    tokio::time::sleep(Duration::from_secs(45 * 60)).await;
    shutdown.cancel();
    running.await?;

    assert_eq!(creates(&origin), 3, "startup plus two interval ticks");
    assert_eq!(origin.deletions().len(), 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn operator_lines_run_commands_and_survive_bad_input() -> Result<()> {
    let temp = TempDir::new()?;
    let origin = Arc::new(MemoryOrigin::new());
    let storage = Arc::new(MemoryStorage::new());
    let shutdown = CancellationToken::new();
    let orchestrator = build(&temp, &origin, &storage, &shutdown)?;

    let (sender, receiver) = mpsc::channel(4);
    sender.send("not-a-command".to_string()).await?;
    sender.send(String::new()).await?;
    sender.send("run-cycle".to_string()).await?;
    drop(sender);

    read_commands(receiver, Arc::clone(&orchestrator), shutdown).await;

    assert_eq!(creates(&origin), 1);
    assert_eq!(storage.names("primary").len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn handle_line_reports_usage_and_failures() -> Result<()> {
    let temp = TempDir::new()?;
    let origin = Arc::new(MemoryOrigin::new().failing("create"));
    let storage = Arc::new(MemoryStorage::new());
    let orchestrator = build(&temp, &origin, &storage, &CancellationToken::new())?;

    let usage = handle_line(&orchestrator, "frobnicate").await.unwrap_or_default();
    assert!(usage.contains("Usage"));

    let failure = handle_line(&orchestrator, "run-cycle").await.unwrap_or_default();
    assert!(failure.starts_with("command.run_cycle"), "{failure}");

    assert!(handle_line(&orchestrator, "   ").await.is_none());
    Ok(())
}

#[tokio::test]
async fn commands_validate_arguments_and_render_metrics() -> Result<()> {
    let temp = TempDir::new()?;
    let origin = Arc::new(MemoryOrigin::new());
    let storage = Arc::new(MemoryStorage::new());
    let orchestrator = build(&temp, &origin, &storage, &CancellationToken::new())?;

    let escaped = execute(
        &orchestrator,
        Command::UploadPath {
            path: "../etc".into(),
        },
    )
    .await;
    assert!(matches!(
        escaped,
        Err(AppError::Backup {
            source: BackupError::InvalidInput { .. },
            ..
        })
    ));
    assert!(origin.calls().is_empty());

    assert!(matches!(
        execute(&orchestrator, Command::Daemon).await,
        Err(AppError::InvalidCommand { .. })
    ));

    let metrics = execute(&orchestrator, Command::Metrics).await?;
    assert!(metrics.contains("backhaul_cycle_in_flight"));
    Ok(())
}

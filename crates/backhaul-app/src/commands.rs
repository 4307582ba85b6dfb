//! Operator command grammar shared by the one-shot CLI and the daemon's stdin reader.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use backhaul_core::{Artifact, ArtifactId, BackupConstraint, LocationRole};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::orchestrator::Orchestrator;
use crate::report::{CycleReport, Trigger};

const STDIN_BUFFER: usize = 16;

/// Relay panel backups into Google Drive and back.
#[derive(Debug, Parser)]
#[command(name = "backhaul", version, about)]
pub struct Cli {
    /// Command to run; the scheduler daemon starts when omitted.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Operations available to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the scheduler and read commands from stdin.
    Daemon,
    /// Run one full backup cycle without the archive copy.
    RunCycle,
    /// Push a stored artifact to the server and unpack it.
    Restore {
        /// Storage artifact identifier.
        artifact_id: String,
    },
    /// Back up one server path into the primary folder.
    UploadPath {
        /// Server-relative path.
        path: String,
    },
    /// Upload an existing local file into the primary folder.
    UploadLocal {
        /// Local file to upload.
        file: PathBuf,
    },
    /// Push a stored artifact to the server without unpacking it.
    DownloadToOrigin {
        /// Storage artifact identifier.
        artifact_id: String,
    },
    /// List artifacts held by one location.
    List {
        /// Location to list.
        #[arg(value_enum)]
        location: ListTarget,
    },
    /// Print Prometheus metrics.
    Metrics,
}

impl Command {
    /// Stable label used in logs and error context.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Daemon => "command.daemon",
            Self::RunCycle => "command.run_cycle",
            Self::Restore { .. } => "command.restore",
            Self::UploadPath { .. } => "command.upload_path",
            Self::UploadLocal { .. } => "command.upload_local",
            Self::DownloadToOrigin { .. } => "command.download_to_origin",
            Self::List { .. } => "command.list",
            Self::Metrics => "command.metrics",
        }
    }
}

/// Locations accepted by `list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListTarget {
    /// Frequent-copy folder.
    Primary,
    /// Daily-copy folder.
    Archive,
    /// Backups held by the server itself.
    Origin,
}

impl From<ListTarget> for LocationRole {
    fn from(target: ListTarget) -> Self {
        match target {
            ListTarget::Primary => Self::Primary,
            ListTarget::Archive => Self::Archive,
            ListTarget::Origin => Self::Origin,
        }
    }
}

/// Parse one stdin line using the CLI grammar. Blank lines yield `None`.
///
/// # Errors
///
/// Returns the clap error, whose rendering includes usage.
pub fn parse_line(line: &str) -> Result<Option<Command>, clap::Error> {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() {
        return Ok(None);
    }
    let cli = Cli::try_parse_from(std::iter::once("backhaul").chain(words))?;
    Ok(cli.command)
}

/// Execute a command and return the text shown to the operator.
///
/// # Errors
///
/// Returns [`AppError::Backup`] when the operation is rejected, fails, or receives an
/// invalid path, and [`AppError::InvalidCommand`] for `daemon`.
pub async fn execute(orchestrator: &Orchestrator, command: Command) -> AppResult<String> {
    let operation = command.label();
    let trigger = Trigger::Command;
    let report = match command {
        Command::Daemon => {
            return Err(AppError::InvalidCommand {
                reason: "daemon_not_interactive",
                value: None,
            });
        }
        Command::Metrics => {
            return orchestrator
                .metrics()
                .render()
                .map_err(|err| AppError::telemetry("metrics.render", err));
        }
        Command::List { location } => {
            let artifacts = orchestrator
                .list(location.into())
                .await
                .map_err(|err| AppError::backup(operation, err))?;
            return Ok(render_listing(&artifacts));
        }
        Command::RunCycle => orchestrator.run_cycle(false, trigger).await,
        Command::Restore { artifact_id } => {
            orchestrator
                .restore(ArtifactId::new(artifact_id), trigger)
                .await
        }
        Command::DownloadToOrigin { artifact_id } => {
            orchestrator
                .download_to_origin(ArtifactId::new(artifact_id), trigger)
                .await
        }
        Command::UploadPath { path } => {
            let constraint =
                BackupConstraint::new(&path).map_err(|err| AppError::backup(operation, err))?;
            orchestrator.upload_path(constraint, trigger).await
        }
        Command::UploadLocal { file } => orchestrator.upload_local(file, trigger).await,
    };
    finish(operation, report.map_err(|err| AppError::backup(operation, err))?)
}

fn finish(operation: &'static str, mut report: CycleReport) -> AppResult<String> {
    let summary = report.summary();
    match report.error.take() {
        None => Ok(summary),
        Some(err) => Err(AppError::backup(operation, err)),
    }
}

fn render_listing(artifacts: &[Artifact]) -> String {
    if artifacts.is_empty() {
        return "no artifacts".to_string();
    }
    artifacts
        .iter()
        .map(|artifact| {
            let size = artifact
                .size_bytes
                .map_or_else(|| "-".to_string(), |bytes| bytes.to_string());
            format!(
                "{}\t{}\t{}\t{size}",
                artifact.id,
                artifact.name,
                artifact.created_at.to_rfc3339()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Handle one stdin line; returns the operator-facing response, if any.
pub async fn handle_line(orchestrator: &Orchestrator, line: &str) -> Option<String> {
    let command = match parse_line(line) {
        Ok(Some(command)) => command,
        Ok(None) => return None,
        Err(err) => return Some(err.render().to_string()),
    };
    info!(command = command.label(), "operator command received");
    match execute(orchestrator, command).await {
        Ok(output) => Some(output),
        Err(err) => {
            warn!(error = %err, "operator command failed");
            Some(describe(&err))
        }
    }
}

fn describe(err: &AppError) -> String {
    match err {
        AppError::Backup { operation, source } => {
            format!("{operation}: {source} ({})", source.kind())
        }
        other => other.to_string(),
    }
}

/// Forward stdin lines from a dedicated thread; blocking reads never hold up runtime shutdown.
#[must_use]
pub fn stdin_lines() -> mpsc::Receiver<String> {
    let (sender, receiver) = mpsc::channel(STDIN_BUFFER);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if sender.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "stdin read failed; operator commands disabled");
                    break;
                }
            }
        }
    });
    receiver
}

/// Execute operator lines until the input closes or shutdown fires. Each command runs as
/// its own task.
pub async fn read_commands(
    mut lines: mpsc::Receiver<String>,
    orchestrator: Arc<Orchestrator>,
    shutdown: CancellationToken,
) {
    let mut running = JoinSet::new();
    loop {
        while running.try_join_next().is_some() {}
        let line = tokio::select! {
            () = shutdown.cancelled() => break,
            line = lines.recv() => line,
        };
        let Some(line) = line else {
            info!("operator input closed");
            break;
        };
        let orchestrator = Arc::clone(&orchestrator);
        running.spawn(async move {
            if let Some(output) = handle_line(&orchestrator, &line).await {
                println!("{output}");
            }
        });
    }
    while running.join_next().await.is_some() {}
}

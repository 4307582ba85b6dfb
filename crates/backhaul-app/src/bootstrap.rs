use std::path::PathBuf;
use std::sync::Arc;

use backhaul_config::{BackhaulConfig, DriveCredentials};
use backhaul_core::naming::log_file_name;
use backhaul_core::{OriginBackups, StorageTier};
use backhaul_remote::{
    DriveTier, PanelClient, RefreshCredentials, RefreshingToken, StaticToken, TokenSource,
    build_client,
};
use backhaul_telemetry::{LogFormat, LoggingConfig, Metrics};
use chrono::Utc;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::commands::{Cli, Command, execute, read_commands, stdin_lines};
use crate::error::{AppError, AppResult};
use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::scheduler::Scheduler;

/// Dependencies required to run the backup application.
pub(crate) struct BootstrapDependencies {
    config: BackhaulConfig,
    origin: Arc<dyn OriginBackups>,
    storage: Arc<dyn StorageTier>,
    metrics: Metrics,
}

impl BootstrapDependencies {
    /// Construct production adapters for the panel and Drive from validated configuration.
    pub(crate) fn from_config(config: BackhaulConfig) -> AppResult<Self> {
        let client = build_client().map_err(|err| AppError::backup("http.build_client", err))?;
        let origin = PanelClient::new(
            client.clone(),
            config.panel.base_url.clone(),
            config.panel.api_key.expose(),
            config.panel.server_id.clone(),
        );
        let token = token_source(&config.drive.credentials, &client);
        let storage = DriveTier::new(client, config.drive.api_base.clone(), token);
        let metrics =
            Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
        Ok(Self {
            config,
            origin: Arc::new(origin),
            storage: Arc::new(storage),
            metrics,
        })
    }
}

fn token_source(credentials: &DriveCredentials, client: &reqwest::Client) -> Arc<dyn TokenSource> {
    match credentials {
        DriveCredentials::AccessToken { token } => Arc::new(StaticToken::new(token.expose())),
        DriveCredentials::Refresh {
            client_id,
            client_secret,
            refresh_token,
            token_url,
        } => Arc::new(RefreshingToken::new(
            client.clone(),
            token_url.clone(),
            RefreshCredentials {
                client_id: client_id.clone(),
                client_secret: client_secret.expose().to_string(),
                refresh_token: refresh_token.expose().to_string(),
            },
        )),
    }
}

/// Entry point for the backup application.
///
/// # Errors
///
/// Returns an error if configuration is invalid, logging cannot start, or a one-shot
/// command fails.
pub async fn run_app() -> AppResult<()> {
    let cli = Cli::parse();
    let config =
        backhaul_config::from_env().map_err(|err| AppError::config("config.from_env", err))?;
    init_telemetry(&config)?;
    log_effective_config(&config);

    let dependencies = BootstrapDependencies::from_config(config)?;
    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    let command = cli.command.unwrap_or(Command::Daemon);
    Box::pin(run_app_with(dependencies, command, shutdown)).await
}

/// Run `command` against injected dependencies.
pub(crate) async fn run_app_with(
    dependencies: BootstrapDependencies,
    command: Command,
    shutdown: CancellationToken,
) -> AppResult<()> {
    let BootstrapDependencies {
        config,
        origin,
        storage,
        metrics,
    } = dependencies;
    let orchestrator = Arc::new(Orchestrator::new(
        origin,
        storage,
        OrchestratorSettings::from_config(&config),
        metrics,
        shutdown.clone(),
    ));

    if command != Command::Daemon {
        let output = execute(&orchestrator, command).await?;
        println!("{output}");
        return Ok(());
    }

    info!("backhaul daemon starting");
    let operator = tokio::spawn(read_commands(
        stdin_lines(),
        Arc::clone(&orchestrator),
        shutdown.clone(),
    ));
    Scheduler::new(
        orchestrator,
        config.schedule.interval,
        config.schedule.daily_at,
    )
    .run(shutdown)
    .await;
    if let Err(err) = operator.await {
        warn!(error = %err, "operator command reader failed");
    }
    info!("backhaul daemon stopped");
    Ok(())
}

fn init_telemetry(config: &BackhaulConfig) -> AppResult<()> {
    let log_file = log_file_path(config);
    let format = config
        .logging
        .format
        .as_deref()
        .and_then(LogFormat::from_name)
        .unwrap_or_else(LogFormat::infer);
    let logging = LoggingConfig {
        level: &config.logging.level,
        format,
        log_file: Some(&log_file),
    };
    backhaul_telemetry::init_logging(&logging)
        .map_err(|err| AppError::telemetry("telemetry.init", err))
}

fn log_file_path(config: &BackhaulConfig) -> PathBuf {
    config.paths.logs_dir.join(log_file_name(Utc::now()))
}

fn log_effective_config(config: &BackhaulConfig) {
    info!(
        log_file = ?backhaul_telemetry::active_log_file(),
        drive_auth = config.drive.credentials.kind(),
        panel_url = %config.panel.base_url,
        server_id = %config.panel.server_id,
        primary_folder = %config.drive.primary_folder,
        archive_folder = ?config.drive.archive_folder,
        max_server_backups = config.retention.max_server_backups,
        max_primary_backups = config.retention.max_primary_backups,
        max_archive_backups = config.retention.max_archive_backups,
        initial_delay_secs = config.polling.initial_delay.as_secs(),
        poll_interval_secs = config.polling.interval.as_secs(),
        poll_timeout_secs = config.polling.timeout.as_secs(),
        failure_grace_secs = config.polling.failure_grace.as_secs(),
        interval_minutes = config.schedule.interval.as_secs() / 60,
        daily_at = %config.schedule.daily_at.format("%H:%M"),
        temp_dir = %config.paths.temp_dir.display(),
        logs_dir = %config.paths.logs_dir.display(),
        "effective configuration"
    );
}

fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received; finishing in-flight work"),
            Err(err) => warn!(error = %err, "failed to listen for interrupt; shutting down"),
        }
        shutdown.cancel();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use backhaul_config::from_lookup;
    use backhaul_core::BackupError;
    use backhaul_test_support::fixtures::artifact;
    use backhaul_test_support::{MemoryOrigin, MemoryStorage};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn config(temp: &TempDir) -> anyhow::Result<BackhaulConfig> {
        let temp_dir = temp.path().join("staging").display().to_string();
        let logs_dir = temp.path().join("logs").display().to_string();
        let vars: HashMap<&str, String> = HashMap::from([
            ("PTERO_PANEL_URL", "https://panel.example.com".to_string()),
            ("PTERO_API_KEY", "ptlc_key".to_string()),
            ("PTERO_SERVER_ID", "1a2b3c4d".to_string()),
            ("GOOGLE_DRIVE_FOLDER_ID", "primary".to_string()),
            ("GOOGLE_DRIVE_ACCESS_TOKEN", "ya29.token".to_string()),
            ("BACKHAUL_INITIAL_DELAY_SECS", "0".to_string()),
            ("BACKHAUL_TEMP_DIR", temp_dir),
            ("BACKHAUL_LOGS_DIR", logs_dir),
        ]);
        Ok(from_lookup(|name| vars.get(name).cloned())?)
    }

    fn dependencies(
        config: BackhaulConfig,
        origin: Arc<MemoryOrigin>,
        storage: Arc<MemoryStorage>,
    ) -> anyhow::Result<BootstrapDependencies> {
        Ok(BootstrapDependencies {
            config,
            origin,
            storage,
            metrics: Metrics::new()?,
        })
    }

    #[test]
    fn production_dependencies_build_from_config() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let deps = BootstrapDependencies::from_config(config(&temp)?)?;
        assert_eq!(deps.origin.location().as_str(), "1a2b3c4d");
        Ok(())
    }

    #[test]
    fn refresh_credentials_select_refreshing_token_source() -> anyhow::Result<()> {
        let credentials = DriveCredentials::Refresh {
            client_id: "client-1".into(),
            client_secret: backhaul_config::Secret::new("shh"),
            refresh_token: backhaul_config::Secret::new("1//refresh"),
            token_url: "https://oauth2.googleapis.com/token".parse()?,
        };

        let source = token_source(&credentials, &reqwest::Client::new());

        let rendered = format!("{source:?}");
        assert!(rendered.starts_with("RefreshingToken"));
        assert!(!rendered.contains("shh"));
        Ok(())
    }

    #[test]
    fn log_file_lives_in_logs_dir() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = log_file_path(&config(&temp)?);
        assert!(path.starts_with(temp.path().join("logs")));
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        assert!(name.starts_with("backup_") && name.ends_with(".log"));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_cycle_runs_against_injected_dependencies() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let origin = Arc::new(MemoryOrigin::new());
        let storage = Arc::new(MemoryStorage::new());
        let deps = dependencies(config(&temp)?, Arc::clone(&origin), Arc::clone(&storage))?;

        run_app_with(deps, Command::RunCycle, CancellationToken::new()).await?;

        assert_eq!(storage.names("primary").len(), 1);
        assert_eq!(origin.deletions().len(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_failure_surfaces_as_error() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let origin = Arc::new(MemoryOrigin::new().failing("create"));
        let storage = Arc::new(MemoryStorage::new().with_artifact(artifact("p1", "primary", 0), b"x"));
        let deps = dependencies(config(&temp)?, origin, Arc::clone(&storage))?;

        let result = run_app_with(deps, Command::RunCycle, CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(AppError::Backup {
                operation: "command.run_cycle",
                source: BackupError::HttpStatus { .. },
            })
        ));
        assert_eq!(storage.names("primary"), vec!["p1.tar.gz".to_string()]);
        Ok(())
    }
}

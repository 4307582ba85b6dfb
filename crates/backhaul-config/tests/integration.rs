use std::collections::HashMap;
use std::time::Duration;

use backhaul_config::{ConfigError, DriveCredentials, from_lookup};
use chrono::NaiveTime;

fn base_env() -> HashMap<&'static str, String> {
    HashMap::from([
        ("PTERO_PANEL_URL", "https://panel.example.com".to_string()),
        ("PTERO_API_KEY", "ptlc_secret".to_string()),
        ("PTERO_SERVER_ID", "1a7ce997".to_string()),
        ("GOOGLE_DRIVE_FOLDER_ID", "primary-folder".to_string()),
        ("GOOGLE_DRIVE_ACCESS_TOKEN", "ya29.token".to_string()),
    ])
}

fn load(
    env: &HashMap<&'static str, String>,
) -> Result<backhaul_config::BackhaulConfig, ConfigError> {
    from_lookup(|name| env.get(name).cloned())
}

#[test]
fn defaults_apply_when_optional_values_are_unset() -> anyhow::Result<()> {
    let config = load(&base_env())?;

    assert_eq!(config.panel.server_id, "1a7ce997");
    assert_eq!(config.panel.api_key.expose(), "ptlc_secret");
    assert_eq!(config.retention.max_server_backups, 2);
    assert_eq!(config.retention.max_primary_backups, 3);
    assert_eq!(config.retention.max_archive_backups, 5);
    assert_eq!(config.polling.initial_delay, Duration::from_secs(30));
    assert_eq!(config.polling.interval, Duration::from_secs(10));
    assert_eq!(config.polling.timeout, Duration::from_secs(900));
    assert_eq!(config.polling.failure_grace, Duration::from_secs(60));
    assert_eq!(config.schedule.interval, Duration::from_secs(20 * 60));
    assert_eq!(
        Some(config.schedule.daily_at),
        NaiveTime::from_hms_opt(23, 59, 0)
    );
    assert_eq!(config.paths.temp_dir.to_str(), Some("temp_backups"));
    assert_eq!(config.paths.logs_dir.to_str(), Some("logs"));
    assert_eq!(config.drive.api_base.as_str(), "https://www.googleapis.com/");
    assert!(!config.archive_enabled());
    assert_eq!(config.logging.level, "info");
    assert!(config.logging.format.is_none());
    Ok(())
}

#[test]
fn every_missing_required_variable_is_reported() {
    let mut env = base_env();
    env.remove("PTERO_API_KEY");
    env.insert("GOOGLE_DRIVE_ACCESS_TOKEN", "   ".to_string());

    match load(&env) {
        Err(ConfigError::MissingVariables { names }) => {
            assert_eq!(names, vec!["PTERO_API_KEY", "GOOGLE_DRIVE_ACCESS_TOKEN"]);
        }
        other => panic!("expected missing variables, got {other:?}"),
    }
}

#[test]
fn archive_folder_enables_daily_copies() -> anyhow::Result<()> {
    let mut env = base_env();
    env.insert("GOOGLE_DRIVE_DAYS_FOLDER_ID", "days-folder".to_string());
    env.insert("BACKHAUL_MAX_DAILY_BACKUPS", "7".to_string());
    env.insert("BACKHAUL_DAILY_AT", "04:15".to_string());

    let config = load(&env)?;
    assert!(config.archive_enabled());
    assert_eq!(config.drive.archive_folder.as_deref(), Some("days-folder"));
    assert_eq!(config.retention.max_archive_backups, 7);
    assert_eq!(
        Some(config.schedule.daily_at),
        NaiveTime::from_hms_opt(4, 15, 0)
    );
    Ok(())
}

#[test]
fn invalid_values_name_the_variable() {
    let cases = [
        ("BACKHAUL_MAX_BACKUPS", "0", "must_be_at_least_one"),
        ("BACKHAUL_MAX_SERVER_BACKUPS", "two", "not_a_number"),
        ("BACKHAUL_POLL_INTERVAL_SECS", "0", "must_be_positive"),
        ("BACKHAUL_INTERVAL_MINUTES", "0", "must_be_positive"),
        ("BACKHAUL_DAILY_AT", "midnight", "not_hh_mm"),
        ("BACKHAUL_LOG_FORMAT", "xml", "unknown_format"),
        ("PTERO_PANEL_URL", "not a url", "invalid_url"),
    ];

    for (variable, value, expected) in cases {
        let mut env = base_env();
        env.insert(variable, value.to_string());
        match load(&env) {
            Err(ConfigError::InvalidField { field, reason, .. }) => {
                assert_eq!(field, variable);
                assert_eq!(reason, expected, "{variable}={value}");
            }
            other => panic!("expected invalid field for {variable}, got {other:?}"),
        }
    }
}

#[test]
fn zero_initial_delay_is_allowed() -> anyhow::Result<()> {
    let mut env = base_env();
    env.insert("BACKHAUL_INITIAL_DELAY_SECS", "0".to_string());
    env.insert("BACKHAUL_FAILURE_GRACE_SECS", "0".to_string());

    let config = load(&env)?;
    assert_eq!(config.polling.initial_delay, Duration::ZERO);
    assert_eq!(config.polling.failure_grace, Duration::ZERO);
    Ok(())
}

#[test]
fn serialised_config_redacts_credentials() -> anyhow::Result<()> {
    let config = load(&base_env())?;
    let rendered = serde_json::to_string(&config)?;
    assert!(!rendered.contains("ptlc_secret"));
    assert!(!rendered.contains("ya29.token"));
    assert!(rendered.contains("primary-folder"));
    Ok(())
}

#[test]
fn refresh_credentials_take_precedence_over_access_token() -> anyhow::Result<()> {
    let mut env = base_env();
    env.insert("GOOGLE_DRIVE_CLIENT_ID", "client-1".to_string());
    env.insert("GOOGLE_DRIVE_CLIENT_SECRET", "client-secret".to_string());
    env.insert("GOOGLE_DRIVE_REFRESH_TOKEN", "1//refresh".to_string());

    let config = load(&env)?;
    match &config.drive.credentials {
        DriveCredentials::Refresh {
            client_id,
            refresh_token,
            token_url,
            ..
        } => {
            assert_eq!(client_id, "client-1");
            assert_eq!(refresh_token.expose(), "1//refresh");
            assert_eq!(token_url.as_str(), "https://oauth2.googleapis.com/token");
        }
        other => anyhow::bail!("expected refresh credentials, got {other:?}"),
    }
    assert_eq!(config.drive.credentials.kind(), "refresh_token");
    let rendered = serde_json::to_string(&config)?;
    assert!(!rendered.contains("client-secret"));
    assert!(!rendered.contains("1//refresh"));
    Ok(())
}

#[test]
fn refresh_credentials_alone_satisfy_drive_auth() -> anyhow::Result<()> {
    let mut env = base_env();
    env.remove("GOOGLE_DRIVE_ACCESS_TOKEN");
    env.insert("GOOGLE_DRIVE_CLIENT_ID", "client-1".to_string());
    env.insert("GOOGLE_DRIVE_CLIENT_SECRET", "client-secret".to_string());
    env.insert("GOOGLE_DRIVE_REFRESH_TOKEN", "1//refresh".to_string());
    env.insert("GOOGLE_OAUTH_TOKEN_URL", "http://127.0.0.1:9/token".to_string());

    let config = load(&env)?;
    assert!(matches!(
        config.drive.credentials,
        DriveCredentials::Refresh { ref token_url, .. } if token_url.port() == Some(9)
    ));
    Ok(())
}

#[test]
fn partial_refresh_set_names_the_absent_members() {
    let mut env = base_env();
    env.insert("GOOGLE_DRIVE_CLIENT_ID", "client-1".to_string());

    match load(&env) {
        Err(ConfigError::MissingVariables { names }) => {
            assert_eq!(
                names,
                vec!["GOOGLE_DRIVE_CLIENT_SECRET", "GOOGLE_DRIVE_REFRESH_TOKEN"]
            );
        }
        other => panic!("expected missing variables, got {other:?}"),
    }
}

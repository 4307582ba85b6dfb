//! Environment-backed configuration loader.
//!
//! # Design
//! - Variables are read through a lookup closure so tests never touch the process environment.
//! - Every missing required variable is reported in one error.
//! - Empty values count as unset.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use tracing::debug;
use url::Url;

use crate::defaults;
use crate::error::{ConfigError, ConfigResult};
use crate::model::{
    BackhaulConfig, DriveConfig, DriveCredentials, LoggingSettings, PanelConfig, PathsConfig,
    PollingConfig, RetentionConfig, ScheduleConfig, Secret,
};

/// Panel base URL.
pub const PANEL_URL: &str = "PTERO_PANEL_URL";
/// Panel client API key.
pub const PANEL_API_KEY: &str = "PTERO_API_KEY";
/// Panel server identifier.
pub const SERVER_ID: &str = "PTERO_SERVER_ID";
/// Primary folder identifier.
pub const PRIMARY_FOLDER: &str = "GOOGLE_DRIVE_FOLDER_ID";
/// Archive folder identifier.
pub const ARCHIVE_FOLDER: &str = "GOOGLE_DRIVE_DAYS_FOLDER_ID";
/// Drive access token.
pub const DRIVE_TOKEN: &str = "GOOGLE_DRIVE_ACCESS_TOKEN";
/// OAuth client identifier for refresh-token grants.
pub const DRIVE_CLIENT_ID: &str = "GOOGLE_DRIVE_CLIENT_ID";
/// OAuth client secret for refresh-token grants.
pub const DRIVE_CLIENT_SECRET: &str = "GOOGLE_DRIVE_CLIENT_SECRET";
/// Refresh token for refresh-token grants.
pub const DRIVE_REFRESH_TOKEN: &str = "GOOGLE_DRIVE_REFRESH_TOKEN";
/// OAuth token endpoint override.
pub const OAUTH_TOKEN_URL: &str = "GOOGLE_OAUTH_TOKEN_URL";
/// Drive API host override.
pub const DRIVE_API_URL: &str = "BACKHAUL_DRIVE_API_URL";

const REQUIRED: [&str; 4] = [PANEL_URL, PANEL_API_KEY, SERVER_ID, PRIMARY_FOLDER];
const REFRESH: [&str; 3] = [DRIVE_CLIENT_ID, DRIVE_CLIENT_SECRET, DRIVE_REFRESH_TOKEN];

/// Load configuration from the process environment.
///
/// # Errors
///
/// Returns [`ConfigError`] when required variables are missing or a value is invalid.
pub fn from_env() -> ConfigResult<BackhaulConfig> {
    from_lookup(|name| std::env::var(name).ok())
}

/// Load configuration through an arbitrary variable lookup.
///
/// # Errors
///
/// Returns [`ConfigError::MissingVariables`] naming every unset required variable, or
/// [`ConfigError::InvalidField`] for the first value that fails validation.
pub fn from_lookup<F>(lookup: F) -> ConfigResult<BackhaulConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| {
        lookup(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let mut missing: Vec<&'static str> = REQUIRED
        .into_iter()
        .filter(|name| get(*name).is_none())
        .collect();
    missing.extend(missing_credentials(&get));
    if !missing.is_empty() {
        return Err(ConfigError::MissingVariables { names: missing });
    }
    let required = |name: &'static str| {
        get(name).ok_or(ConfigError::MissingVariables { names: vec![name] })
    };

    let panel_url = required(PANEL_URL)?;
    let panel = PanelConfig {
        base_url: parse_url(PANEL_URL, &panel_url)?,
        api_key: Secret::new(required(PANEL_API_KEY)?),
        server_id: required(SERVER_ID)?,
    };

    let api_base = get(DRIVE_API_URL).unwrap_or_else(|| defaults::DRIVE_API_URL.to_string());
    let drive = DriveConfig {
        primary_folder: required(PRIMARY_FOLDER)?,
        archive_folder: get(ARCHIVE_FOLDER),
        credentials: drive_credentials(&get)?,
        api_base: parse_url(DRIVE_API_URL, &api_base)?,
    };

    let retention = RetentionConfig {
        max_server_backups: count(
            &get,
            "BACKHAUL_MAX_SERVER_BACKUPS",
            defaults::MAX_SERVER_BACKUPS,
        )?,
        max_primary_backups: count(
            &get,
            "BACKHAUL_MAX_BACKUPS",
            defaults::MAX_PRIMARY_BACKUPS,
        )?,
        max_archive_backups: count(
            &get,
            "BACKHAUL_MAX_DAILY_BACKUPS",
            defaults::MAX_ARCHIVE_BACKUPS,
        )?,
    };

    let polling = PollingConfig {
        initial_delay: seconds(
            &get,
            "BACKHAUL_INITIAL_DELAY_SECS",
            defaults::INITIAL_DELAY_SECS,
            true,
        )?,
        interval: seconds(
            &get,
            "BACKHAUL_POLL_INTERVAL_SECS",
            defaults::POLL_INTERVAL_SECS,
            false,
        )?,
        timeout: seconds(
            &get,
            "BACKHAUL_POLL_TIMEOUT_SECS",
            defaults::POLL_TIMEOUT_SECS,
            false,
        )?,
        failure_grace: seconds(
            &get,
            "BACKHAUL_FAILURE_GRACE_SECS",
            defaults::FAILURE_GRACE_SECS,
            true,
        )?,
    };

    let interval_minutes = parse_number::<u64>(
        "BACKHAUL_INTERVAL_MINUTES",
        get("BACKHAUL_INTERVAL_MINUTES"),
        defaults::INTERVAL_MINUTES,
    )?;
    if interval_minutes == 0 {
        return Err(ConfigError::invalid(
            "BACKHAUL_INTERVAL_MINUTES",
            "0",
            "must_be_positive",
        ));
    }
    let daily_at_raw = get("BACKHAUL_DAILY_AT").unwrap_or_else(|| defaults::DAILY_AT.to_string());
    let daily_at = NaiveTime::parse_from_str(&daily_at_raw, "%H:%M")
        .map_err(|_| ConfigError::invalid("BACKHAUL_DAILY_AT", &daily_at_raw, "not_hh_mm"))?;
    let schedule = ScheduleConfig {
        interval: Duration::from_secs(interval_minutes.saturating_mul(60)),
        daily_at,
    };

    let paths = PathsConfig {
        temp_dir: PathBuf::from(
            get("BACKHAUL_TEMP_DIR").unwrap_or_else(|| defaults::TEMP_DIR.to_string()),
        ),
        logs_dir: PathBuf::from(
            get("BACKHAUL_LOGS_DIR").unwrap_or_else(|| defaults::LOGS_DIR.to_string()),
        ),
    };

    let format = get("BACKHAUL_LOG_FORMAT").map(|value| value.to_ascii_lowercase());
    if let Some(value) = format.as_deref()
        && !matches!(value, "json" | "pretty")
    {
        return Err(ConfigError::invalid(
            "BACKHAUL_LOG_FORMAT",
            value,
            "unknown_format",
        ));
    }
    let logging = LoggingSettings {
        level: get("BACKHAUL_LOG_LEVEL").unwrap_or_else(|| defaults::LOG_LEVEL.to_string()),
        format,
    };

    Ok(BackhaulConfig {
        panel,
        drive,
        retention,
        polling,
        schedule,
        paths,
        logging,
    })
}

/// Refresh credentials win when all three are set; otherwise an access token is required.
/// A partial refresh set names its absent members.
fn missing_credentials<G>(get: &G) -> Vec<&'static str>
where
    G: Fn(&str) -> Option<String>,
{
    let absent: Vec<&'static str> = REFRESH
        .into_iter()
        .filter(|name| get(*name).is_none())
        .collect();
    match absent.len() {
        0 => Vec::new(),
        n if n == REFRESH.len() && get(DRIVE_TOKEN).is_some() => Vec::new(),
        n if n == REFRESH.len() => vec![DRIVE_TOKEN],
        _ => absent,
    }
}

fn drive_credentials<G>(get: &G) -> ConfigResult<DriveCredentials>
where
    G: Fn(&str) -> Option<String>,
{
    if let (Some(client_id), Some(client_secret), Some(refresh_token)) = (
        get(DRIVE_CLIENT_ID),
        get(DRIVE_CLIENT_SECRET),
        get(DRIVE_REFRESH_TOKEN),
    ) {
        let token_url =
            get(OAUTH_TOKEN_URL).unwrap_or_else(|| defaults::OAUTH_TOKEN_URL.to_string());
        return Ok(DriveCredentials::Refresh {
            client_id,
            client_secret: Secret::new(client_secret),
            refresh_token: Secret::new(refresh_token),
            token_url: parse_url(OAUTH_TOKEN_URL, &token_url)?,
        });
    }
    get(DRIVE_TOKEN)
        .map(|token| DriveCredentials::AccessToken {
            token: Secret::new(token),
        })
        .ok_or(ConfigError::MissingVariables {
            names: vec![DRIVE_TOKEN],
        })
}

fn parse_url(field: &'static str, raw: &str) -> ConfigResult<Url> {
    let url = Url::parse(raw).map_err(|_| ConfigError::invalid(field, raw, "invalid_url"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::invalid(field, raw, "unsupported_scheme"));
    }
    Ok(url)
}

fn parse_number<T>(field: &'static str, raw: Option<String>, default: T) -> ConfigResult<T>
where
    T: FromStr + std::fmt::Display,
{
    match raw {
        Some(value) => value
            .parse::<T>()
            .map_err(|_| ConfigError::invalid(field, &value, "not_a_number")),
        None => {
            debug!(variable = field, default = %default, "using default");
            Ok(default)
        }
    }
}

fn count<G>(get: &G, field: &'static str, default: usize) -> ConfigResult<usize>
where
    G: Fn(&str) -> Option<String>,
{
    let value = parse_number(field, get(field), default)?;
    if value == 0 {
        return Err(ConfigError::invalid(field, "0", "must_be_at_least_one"));
    }
    Ok(value)
}

fn seconds<G>(
    get: &G,
    field: &'static str,
    default: u64,
    allow_zero: bool,
) -> ConfigResult<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    let value = parse_number(field, get(field), default)?;
    if value == 0 && !allow_zero {
        return Err(ConfigError::invalid(field, "0", "must_be_positive"));
    }
    Ok(Duration::from_secs(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_url_rejects_non_http_schemes() {
        assert!(parse_url(PANEL_URL, "https://panel.example.com").is_ok());
        assert!(matches!(
            parse_url(PANEL_URL, "ftp://panel.example.com"),
            Err(ConfigError::InvalidField {
                reason: "unsupported_scheme",
                ..
            })
        ));
        assert!(matches!(
            parse_url(PANEL_URL, "panel"),
            Err(ConfigError::InvalidField {
                reason: "invalid_url",
                ..
            })
        ));
    }

    #[test]
    fn parse_number_falls_back_to_default() -> ConfigResult<()> {
        assert_eq!(parse_number::<u64>("X", None, 7)?, 7);
        assert_eq!(parse_number::<u64>("X", Some("9".into()), 7)?, 9);
        assert!(parse_number::<u64>("X", Some("nine".into()), 7).is_err());
        Ok(())
    }
}

//! # Design
//!
//! - Centralize application-level errors for bootstrap, scheduling, and operator commands.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration loading or validation failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: backhaul_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: backhaul_telemetry::TelemetryError,
    },
    /// A backup operation failed or was rejected.
    #[error("backup operation failed")]
    Backup {
        /// Operation identifier.
        operation: &'static str,
        /// Source backup error.
        source: backhaul_core::BackupError,
    },
    /// Operator command could not be interpreted.
    #[error("invalid command")]
    InvalidCommand {
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Offending input when available.
        value: Option<String>,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: backhaul_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: backhaul_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn backup(operation: &'static str, source: backhaul_core::BackupError) -> Self {
        Self::Backup { operation, source }
    }

    /// Whether the failure is the single-flight guard rejecting an overlapping request.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Backup {
                source: backhaul_core::BackupError::Busy,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn app_error_helpers_build_variants() {
        let config = AppError::config(
            "config.load",
            backhaul_config::ConfigError::MissingVariables {
                names: vec!["PTERO_API_KEY"],
            },
        );
        assert!(matches!(config, AppError::Config { .. }));
        assert!(config.source().is_some());

        let backup = AppError::backup("command.run_cycle", backhaul_core::BackupError::Busy);
        assert!(backup.is_busy());
        assert_eq!(backup.to_string(), "backup operation failed");

        let command = AppError::InvalidCommand {
            reason: "daemon_not_interactive",
            value: None,
        };
        assert!(!command.is_busy());
        assert!(command.source().is_none());
    }
}

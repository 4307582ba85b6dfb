#![forbid(unsafe_code)]
#![warn(
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Telemetry primitives for the backhaul workspace: logging setup and Prometheus metrics.

pub mod error;
pub mod init;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use init::{
    DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, active_log_file, init_logging, open_log_file,
};
pub use metrics::{CYCLE_KINDS, Metrics, MetricsSnapshot};

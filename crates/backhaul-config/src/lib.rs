#![forbid(unsafe_code)]
#![warn(
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Environment-driven configuration for the backup orchestrator.
//!
//! Layout: `model.rs` (typed config), `loader.rs` (environment parsing and validation),
//! `defaults.rs` (fallback values), `error.rs` (`ConfigError`).

mod defaults;
pub mod error;
pub mod loader;
pub mod model;

pub use error::{ConfigError, ConfigResult};
pub use loader::{from_env, from_lookup};
pub use model::{
    BackhaulConfig, DriveConfig, DriveCredentials, LoggingSettings, PanelConfig, PathsConfig,
    PollingConfig, RetentionConfig, ScheduleConfig, Secret,
};

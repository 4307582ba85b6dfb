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
#![allow(clippy::module_name_repetitions)]

//! Backup application wiring: orchestrator, scheduler, and operator commands.
//!
//! Layout: `bootstrap.rs` (service wiring), `orchestrator.rs` (lifecycle state machine),
//! `poll.rs` (status polling), `scheduler.rs` (interval and daily triggers), `commands.rs`
//! (operator grammar), `report.rs` (stage trace).

/// Application bootstrap and environment loading.
pub mod bootstrap;
/// Operator command grammar and dispatch.
pub mod commands;
/// Application error types.
pub mod error;
/// Backup lifecycle orchestration.
pub mod orchestrator;
mod poll;
/// Stage trace and outcome types.
pub mod report;
/// Interval and daily cycle triggers.
pub mod scheduler;

pub use bootstrap::run_app;
pub use error::{AppError, AppResult};
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use report::{CycleKind, CycleReport, Stage, StageRecord, StageStatus, Trigger};

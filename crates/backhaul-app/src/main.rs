#![forbid(unsafe_code)]
#![warn(
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs
)]

//! Binary entrypoint for the backup relay.

use backhaul_app::{AppResult, run_app};

/// Boots the application and blocks until the command or daemon finishes.
#[tokio::main]
async fn main() -> AppResult<()> {
    run_app().await
}

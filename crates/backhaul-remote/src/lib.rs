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

//! HTTP adapters for the backup orchestrator: the Pterodactyl panel as origin and
//! Google Drive as the storage tier.
//!
//! Layout: `panel.rs` (origin client), `drive.rs` (storage tier), `token.rs` (access token
//! sources), `http.rs` (shared request plumbing and error mapping).

pub mod drive;
pub mod http;
pub mod panel;
pub mod token;

pub use drive::DriveTier;
pub use http::build_client;
pub use panel::PanelClient;
pub use token::{RefreshCredentials, RefreshingToken, StaticToken, TokenSource};

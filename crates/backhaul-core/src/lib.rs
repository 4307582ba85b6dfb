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

//! Domain primitives for relaying panel backups into off-host storage.
//!
//! Layout: `model.rs` (jobs, artifacts, identifiers), `service.rs` (origin and storage
//! traits), `naming.rs` (artifact naming grammar), `retention.rs` (rotation policy),
//! `transfer.rs` (streaming byte relay), `error.rs` (shared error taxonomy).

pub mod error;
pub mod model;
pub mod naming;
pub mod retention;
pub mod service;
pub mod transfer;

pub use error::{BackupError, BackupResult, BoxError};
pub use model::{
    Artifact, ArtifactId, BackupConstraint, BackupId, BackupJob, BackupStatus, LocationId,
    LocationRole, StorageLocation,
};
pub use retention::{RotationOutcome, prune, rotate};
pub use service::{OriginBackups, StorageTier};
pub use transfer::{ByteStream, StagingFile};

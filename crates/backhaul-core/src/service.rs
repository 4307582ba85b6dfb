//! Traits implemented by the origin panel client and storage tier adapters.

use async_trait::async_trait;
use url::Url;

use crate::error::BackupResult;
use crate::model::{Artifact, ArtifactId, BackupConstraint, BackupId, BackupJob, LocationId};
use crate::transfer::ByteStream;

/// Origin system hosting the live workload; maps 1:1 onto its backup and file endpoints.
#[async_trait]
pub trait OriginBackups: Send + Sync {
    /// Slot identifier used when rotating the origin's own backups.
    fn location(&self) -> LocationId;

    /// List existing backups as artifacts; no filtering or ordering is applied.
    async fn list(&self) -> BackupResult<Vec<Artifact>>;

    /// Start a snapshot, optionally restricted to one path.
    async fn create(&self, constraint: Option<&BackupConstraint>) -> BackupResult<BackupJob>;

    /// Read the current job status once.
    async fn poll_status(&self, id: &BackupId) -> BackupResult<BackupJob>;

    /// Obtain a one-time download locator for a completed job.
    async fn download_locator(&self, id: &BackupId) -> BackupResult<Url>;

    /// Open the byte stream behind a download locator.
    async fn fetch(&self, locator: &Url) -> BackupResult<ByteStream>;

    /// Delete a backup job. Deleting an id that no longer exists succeeds.
    async fn delete(&self, id: &BackupId) -> BackupResult<()>;

    /// Obtain a one-time upload locator for the server file area.
    async fn upload_locator(&self) -> BackupResult<Url>;

    /// Stream a file into the server root through an upload locator.
    async fn upload_file(
        &self,
        locator: &Url,
        name: &str,
        body: ByteStream,
        len: u64,
    ) -> BackupResult<()>;

    /// Unpack an archive previously pushed into the server root.
    async fn decompress(&self, name: &str) -> BackupResult<()>;

    /// Remove a file from the server root.
    async fn delete_file(&self, name: &str) -> BackupResult<()>;
}

/// Durable off-host storage holding artifacts in folders.
#[async_trait]
pub trait StorageTier: Send + Sync {
    /// List artifacts resident in a folder.
    async fn list(&self, location: &LocationId) -> BackupResult<Vec<Artifact>>;

    /// Stream a new artifact into a folder.
    async fn upload(
        &self,
        location: &LocationId,
        name: &str,
        body: ByteStream,
        len: u64,
    ) -> BackupResult<Artifact>;

    /// Delete an artifact.
    async fn delete(&self, id: &ArtifactId) -> BackupResult<()>;

    /// Fetch artifact metadata.
    async fn metadata(&self, id: &ArtifactId) -> BackupResult<Artifact>;

    /// Open the artifact content as a byte stream.
    async fn download(&self, id: &ArtifactId) -> BackupResult<ByteStream>;
}

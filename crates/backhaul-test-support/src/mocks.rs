//! In-memory origin and storage tier that record every call.
//!
//! # Design
//! - State lives behind `std::sync::Mutex`; no guard is held across an await.
//! - Failures are injected per operation name so tests can target one step.
//! - Poll statuses are scripted; the last scripted status repeats forever.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use backhaul_core::transfer::ByteStream;
use backhaul_core::{
    Artifact, ArtifactId, BackupConstraint, BackupError, BackupId, BackupJob, BackupResult,
    BackupStatus, LocationId, OriginBackups, StorageTier,
};
use bytes::Bytes;
use chrono::Utc;
use futures_util::StreamExt;
use url::Url;

use crate::fixtures::{chunked, collect};

const CHUNK: usize = 4;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn injected(operation: &'static str, target: &str) -> BackupError {
    BackupError::http_status(operation, target, 500)
}

/// Calls observed by [`MemoryOrigin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginCall {
    /// `list`.
    List,
    /// `create` with the constraint path, if any.
    Create(Option<String>),
    /// `poll_status`.
    PollStatus(BackupId),
    /// `download_locator`.
    DownloadLocator(BackupId),
    /// `fetch`.
    Fetch(String),
    /// `delete`.
    Delete(BackupId),
    /// `upload_locator`.
    UploadLocator,
    /// `upload_file` with the received content.
    UploadFile {
        /// File name.
        name: String,
        /// Bytes received.
        content: Vec<u8>,
    },
    /// `decompress`.
    Decompress(String),
    /// `delete_file`.
    DeleteFile(String),
}

#[derive(Default)]
struct OriginState {
    backups: Vec<Artifact>,
    statuses: VecDeque<BackupStatus>,
    reported: HashMap<BackupId, BackupStatus>,
    files: HashMap<String, Vec<u8>>,
    calls: Vec<OriginCall>,
    failing: HashSet<&'static str>,
    created: usize,
}

/// How `fetch` behaves after the first chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    Complete,
    Interrupt,
    Stall,
}

/// Scriptable in-memory origin.
pub struct MemoryOrigin {
    location: LocationId,
    payload: Vec<u8>,
    fetch_mode: FetchMode,
    state: Mutex<OriginState>,
}

impl Default for MemoryOrigin {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryOrigin {
    /// Origin with no backups that reports success on the first poll.
    #[must_use]
    pub fn new() -> Self {
        Self {
            location: LocationId::new("server"),
            payload: b"snapshot-payload".to_vec(),
            fetch_mode: FetchMode::Complete,
            state: Mutex::new(OriginState {
                statuses: VecDeque::from([BackupStatus::Succeeded]),
                ..OriginState::default()
            }),
        }
    }

    /// Seed existing backups.
    #[must_use]
    pub fn with_backups(self, backups: Vec<Artifact>) -> Self {
        lock(&self.state).backups = backups;
        self
    }

    /// Script the statuses returned by successive polls.
    #[must_use]
    pub fn with_statuses(self, statuses: impl IntoIterator<Item = BackupStatus>) -> Self {
        lock(&self.state).statuses = statuses.into_iter().collect();
        self
    }

    /// Content served by `fetch`.
    #[must_use]
    pub fn with_payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    /// Make `fetch` fail after the first chunk.
    #[must_use]
    pub const fn interrupt_fetch(mut self) -> Self {
        self.fetch_mode = FetchMode::Interrupt;
        self
    }

    /// Make `fetch` go silent after the first chunk without ever ending.
    #[must_use]
    pub const fn stall_fetch(mut self) -> Self {
        self.fetch_mode = FetchMode::Stall;
        self
    }

    /// Make `operation` (`list`, `create`, `poll_status`, `download_locator`, `fetch`,
    /// `delete`, `upload_locator`, `upload_file`, `decompress`, `delete_file`) fail.
    #[must_use]
    pub fn failing(self, operation: &'static str) -> Self {
        lock(&self.state).failing.insert(operation);
        self
    }

    /// Every call observed so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<OriginCall> {
        lock(&self.state).calls.clone()
    }

    /// Backups currently held.
    #[must_use]
    pub fn backups(&self) -> Vec<Artifact> {
        lock(&self.state).backups.clone()
    }

    /// Ids passed to `delete`, in order.
    #[must_use]
    pub fn deletions(&self) -> Vec<BackupId> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|call| match call {
                OriginCall::Delete(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of `poll_status` calls.
    #[must_use]
    pub fn polls(&self) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| matches!(call, OriginCall::PollStatus(_)))
            .count()
    }

    /// Files currently present in the server root.
    #[must_use]
    pub fn files(&self) -> HashMap<String, Vec<u8>> {
        lock(&self.state).files.clone()
    }

    fn record(&self, call: OriginCall, operation: &'static str, target: &str) -> BackupResult<()> {
        let mut state = lock(&self.state);
        state.calls.push(call);
        if state.failing.contains(operation) {
            return Err(injected(operation, target));
        }
        Ok(())
    }
}

#[async_trait]
impl OriginBackups for MemoryOrigin {
    fn location(&self) -> LocationId {
        self.location.clone()
    }

    async fn list(&self) -> BackupResult<Vec<Artifact>> {
        self.record(OriginCall::List, "list", "backups")?;
        Ok(self.backups())
    }

    async fn create(&self, constraint: Option<&BackupConstraint>) -> BackupResult<BackupJob> {
        self.record(
            OriginCall::Create(constraint.map(|c| c.path().to_string())),
            "create",
            "backups",
        )?;
        let mut state = lock(&self.state);
        state.created += 1;
        let id = format!("backup-{}", state.created);
        state.backups.push(Artifact {
            id: ArtifactId::new(id.as_str()),
            location: self.location.clone(),
            name: id.clone(),
            created_at: Utc::now(),
            size_bytes: None,
        });
        Ok(BackupJob::pending(BackupId::new(id)))
    }

    async fn poll_status(&self, id: &BackupId) -> BackupResult<BackupJob> {
        self.record(OriginCall::PollStatus(id.clone()), "poll_status", id.as_str())?;
        let mut state = lock(&self.state);
        let status = if state.statuses.len() > 1 {
            state.statuses.pop_front()
        } else {
            state.statuses.front().copied()
        }
        .unwrap_or(BackupStatus::Pending);
        state.reported.insert(id.clone(), status);
        Ok(BackupJob {
            id: id.clone(),
            status,
            completed_at: (status == BackupStatus::Succeeded).then(Utc::now),
        })
    }

    async fn download_locator(&self, id: &BackupId) -> BackupResult<Url> {
        self.record(
            OriginCall::DownloadLocator(id.clone()),
            "download_locator",
            id.as_str(),
        )?;
        if lock(&self.state).reported.get(id) != Some(&BackupStatus::Succeeded) {
            return Err(BackupError::NotReady {
                backup_id: id.clone(),
            });
        }
        Url::parse(&format!("memory://origin/{id}"))
            .map_err(|err| BackupError::transport("download_locator", id.as_str(), err))
    }

    async fn fetch(&self, locator: &Url) -> BackupResult<ByteStream> {
        self.record(OriginCall::Fetch(locator.to_string()), "fetch", locator.as_str())?;
        let head = Bytes::from(self.payload.iter().take(CHUNK).copied().collect::<Vec<u8>>());
        match self.fetch_mode {
            FetchMode::Complete => Ok(chunked(&self.payload, CHUNK)),
            FetchMode::Interrupt => {
                let items: Vec<io::Result<Bytes>> = vec![
                    Ok(head),
                    Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")),
                ];
                Ok(Box::pin(futures_util::stream::iter(items)))
            }
            FetchMode::Stall => Ok(Box::pin(
                futures_util::stream::iter(vec![Ok(head)]).chain(futures_util::stream::pending()),
            )),
        }
    }

    async fn delete(&self, id: &BackupId) -> BackupResult<()> {
        self.record(OriginCall::Delete(id.clone()), "delete", id.as_str())?;
        lock(&self.state)
            .backups
            .retain(|backup| backup.id.as_str() != id.as_str());
        Ok(())
    }

    async fn upload_locator(&self) -> BackupResult<Url> {
        self.record(OriginCall::UploadLocator, "upload_locator", "files/upload")?;
        Url::parse("memory://origin/upload")
            .map_err(|err| BackupError::transport("upload_locator", "files/upload", err))
    }

    async fn upload_file(
        &self,
        _locator: &Url,
        name: &str,
        body: ByteStream,
        len: u64,
    ) -> BackupResult<()> {
        let content = collect(body)
            .await
            .map_err(|err| BackupError::transport("upload_file", name, err))?;
        self.record(
            OriginCall::UploadFile {
                name: name.to_string(),
                content: content.clone(),
            },
            "upload_file",
            name,
        )?;
        if content.len() as u64 != len {
            return Err(BackupError::InvalidInput {
                field: "len",
                reason: "length_mismatch",
                value: Some(len.to_string()),
            });
        }
        lock(&self.state).files.insert(name.to_string(), content);
        Ok(())
    }

    async fn decompress(&self, name: &str) -> BackupResult<()> {
        self.record(OriginCall::Decompress(name.to_string()), "decompress", name)
    }

    async fn delete_file(&self, name: &str) -> BackupResult<()> {
        self.record(OriginCall::DeleteFile(name.to_string()), "delete_file", name)?;
        lock(&self.state).files.remove(name);
        Ok(())
    }
}

/// Calls observed by [`MemoryStorage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCall {
    /// `list`.
    List(LocationId),
    /// `upload`.
    Upload {
        /// Destination folder.
        location: LocationId,
        /// Artifact name.
        name: String,
    },
    /// `delete`.
    Delete(ArtifactId),
    /// `metadata`.
    Metadata(ArtifactId),
    /// `download`.
    Download(ArtifactId),
}

struct StoredFile {
    artifact: Artifact,
    content: Vec<u8>,
}

#[derive(Default)]
struct StorageState {
    files: Vec<StoredFile>,
    calls: Vec<StorageCall>,
    failing: HashSet<&'static str>,
    failing_uploads: HashSet<LocationId>,
    failing_deletes: HashSet<ArtifactId>,
    uploaded: usize,
}

/// In-memory storage tier keyed by folder.
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<StorageState>,
}

impl MemoryStorage {
    /// Empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing artifact with content.
    #[must_use]
    pub fn with_artifact(self, artifact: Artifact, content: &[u8]) -> Self {
        lock(&self.state).files.push(StoredFile {
            artifact,
            content: content.to_vec(),
        });
        self
    }

    /// Make `operation` (`list`, `upload`, `delete`, `metadata`, `download`) fail everywhere.
    #[must_use]
    pub fn failing(self, operation: &'static str) -> Self {
        lock(&self.state).failing.insert(operation);
        self
    }

    /// Make uploads into one folder fail.
    #[must_use]
    pub fn failing_upload_to(self, location: &str) -> Self {
        lock(&self.state)
            .failing_uploads
            .insert(LocationId::new(location));
        self
    }

    /// Make deletion of one artifact fail.
    #[must_use]
    pub fn failing_delete_of(self, id: &str) -> Self {
        lock(&self.state).failing_deletes.insert(ArtifactId::new(id));
        self
    }

    /// Every call observed so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<StorageCall> {
        lock(&self.state).calls.clone()
    }

    /// Artifacts currently held in `location`.
    #[must_use]
    pub fn artifacts(&self, location: &str) -> Vec<Artifact> {
        lock(&self.state)
            .files
            .iter()
            .filter(|file| file.artifact.location.as_str() == location)
            .map(|file| file.artifact.clone())
            .collect()
    }

    /// Names currently held in `location`.
    #[must_use]
    pub fn names(&self, location: &str) -> Vec<String> {
        self.artifacts(location)
            .into_iter()
            .map(|artifact| artifact.name)
            .collect()
    }

    /// Content stored under `name` in `location`.
    #[must_use]
    pub fn content(&self, location: &str, name: &str) -> Option<Vec<u8>> {
        lock(&self.state)
            .files
            .iter()
            .find(|file| file.artifact.location.as_str() == location && file.artifact.name == name)
            .map(|file| file.content.clone())
    }

    /// Number of `upload` calls.
    #[must_use]
    pub fn uploads(&self) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| matches!(call, StorageCall::Upload { .. }))
            .count()
    }

    fn record(&self, call: StorageCall, operation: &'static str, target: &str) -> BackupResult<()> {
        let mut state = lock(&self.state);
        state.calls.push(call);
        if state.failing.contains(operation) {
            return Err(injected(operation, target));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageTier for MemoryStorage {
    async fn list(&self, location: &LocationId) -> BackupResult<Vec<Artifact>> {
        self.record(StorageCall::List(location.clone()), "list", location.as_str())?;
        Ok(self.artifacts(location.as_str()))
    }

    async fn upload(
        &self,
        location: &LocationId,
        name: &str,
        body: ByteStream,
        len: u64,
    ) -> BackupResult<Artifact> {
        self.record(
            StorageCall::Upload {
                location: location.clone(),
                name: name.to_string(),
            },
            "upload",
            name,
        )?;
        if lock(&self.state).failing_uploads.contains(location) {
            return Err(injected("upload", name));
        }
        let content = collect(body)
            .await
            .map_err(|err| BackupError::transport("upload", name, err))?;
        if content.len() as u64 != len {
            return Err(BackupError::InvalidInput {
                field: "len",
                reason: "length_mismatch",
                value: Some(len.to_string()),
            });
        }
        let mut state = lock(&self.state);
        state.uploaded += 1;
        let artifact = Artifact {
            id: ArtifactId::new(format!("stored-{}", state.uploaded)),
            location: location.clone(),
            name: name.to_string(),
            created_at: Utc::now(),
            size_bytes: Some(len),
        };
        state.files.push(StoredFile {
            artifact: artifact.clone(),
            content,
        });
        Ok(artifact)
    }

    async fn delete(&self, id: &ArtifactId) -> BackupResult<()> {
        self.record(StorageCall::Delete(id.clone()), "delete", id.as_str())?;
        let mut state = lock(&self.state);
        if state.failing_deletes.contains(id) {
            return Err(injected("delete", id.as_str()));
        }
        let before = state.files.len();
        state.files.retain(|file| &file.artifact.id != id);
        if state.files.len() == before {
            return Err(BackupError::http_status("delete", id.as_str(), 404));
        }
        Ok(())
    }

    async fn metadata(&self, id: &ArtifactId) -> BackupResult<Artifact> {
        self.record(StorageCall::Metadata(id.clone()), "metadata", id.as_str())?;
        lock(&self.state)
            .files
            .iter()
            .find(|file| &file.artifact.id == id)
            .map(|file| file.artifact.clone())
            .ok_or_else(|| BackupError::http_status("metadata", id.as_str(), 404))
    }

    async fn download(&self, id: &ArtifactId) -> BackupResult<ByteStream> {
        self.record(StorageCall::Download(id.clone()), "download", id.as_str())?;
        let content = lock(&self.state)
            .files
            .iter()
            .find(|file| &file.artifact.id == id)
            .map(|file| file.content.clone())
            .ok_or_else(|| BackupError::http_status("download", id.as_str(), 404))?;
        Ok(chunked(&content, CHUNK))
    }
}

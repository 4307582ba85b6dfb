//! Streaming byte relay between remote endpoints and local staging files.
//!
//! # Design
//! - Memory stays bounded by one chunk regardless of snapshot size.
//! - A source that stays silent for [`STALL_TIMEOUT`] fails the relay instead of hanging it.
//! - A failed relay leaves the destination uncommitted; the owner discards it.
//! - `StagingFile` removes itself on every exit path, including drop during cancellation.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt};
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::error::{BackupError, BackupResult, BoxError};

/// Chunk size used when reading local files.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Longest wait for the next chunk before a relay is abandoned.
pub const STALL_TIMEOUT: Duration = Duration::from_secs(600);

/// Owned, sendable stream of byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Adapt a client-specific byte stream into a [`ByteStream`].
pub fn byte_stream<S, E>(source: S) -> ByteStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    Box::pin(source.map_err(io::Error::other))
}

/// Relay every chunk from `source` into `destination`, in order, exactly once.
///
/// # Errors
///
/// Returns [`BackupError::Transfer`] when the source fails or stalls mid-stream, or the
/// destination rejects a write. The destination content is undefined afterwards.
pub async fn stream<S, W>(source: S, destination: &mut W, path: &Path) -> BackupResult<u64>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
    W: AsyncWrite + Unpin,
{
    stream_within(source, destination, path, STALL_TIMEOUT).await
}

/// [`stream`] with an explicit per-chunk stall budget.
///
/// # Errors
///
/// Same as [`stream`]; a silent source fails with operation `stalled_source`.
pub async fn stream_within<S, W>(
    mut source: S,
    destination: &mut W,
    path: &Path,
    stall: Duration,
) -> BackupResult<u64>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut transferred: u64 = 0;
    loop {
        let Ok(next) = tokio::time::timeout(stall, source.next()).await else {
            warn!(
                path = %path.display(),
                transferred,
                stall_secs = stall.as_secs(),
                "source stalled; abandoning relay"
            );
            return Err(BackupError::transfer(
                "stalled_source",
                path,
                io::Error::new(io::ErrorKind::TimedOut, "no data within stall budget"),
            ));
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk.map_err(|err| BackupError::transfer("read_source", path, err))?;
        destination
            .write_all(&chunk)
            .await
            .map_err(|err| BackupError::transfer("write_destination", path, err))?;
        transferred = transferred.saturating_add(chunk.len() as u64);
    }
    destination
        .flush()
        .await
        .map_err(|err| BackupError::transfer("flush_destination", path, err))?;
    Ok(transferred)
}

/// Open a local file as a chunked stream together with its length.
///
/// # Errors
///
/// Returns [`BackupError::Io`] when the file cannot be opened or inspected.
pub async fn open_stream(path: &Path) -> BackupResult<(ByteStream, u64)> {
    let file = File::open(path)
        .await
        .map_err(|err| BackupError::io("open_file", path, err))?;
    let len = file
        .metadata()
        .await
        .map_err(|err| BackupError::io("stat_file", path, err))?
        .len();
    Ok((Box::pin(ReaderStream::with_capacity(file, CHUNK_SIZE)), len))
}

/// Local temporary file owned by a single orchestrator invocation.
#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
    discarded: bool,
}

impl StagingFile {
    /// Reserve a staging path; nothing touches disk until [`StagingFile::fill`].
    #[must_use]
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(name),
            discarded: false,
        }
    }

    /// Location of the staging file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stream `source` into the staging file, replacing previous content.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Io`] if the file cannot be created and
    /// [`BackupError::Transfer`] if the relay is interrupted.
    pub async fn fill(&mut self, source: ByteStream) -> BackupResult<u64> {
        let file = File::create(&self.path)
            .await
            .map_err(|err| BackupError::io("create_staging", &self.path, err))?;
        let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);
        let written = stream(source, &mut writer, &self.path).await?;
        debug!(path = %self.path.display(), bytes = written, "staging file filled");
        Ok(written)
    }

    /// Open the staging file for an upload.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Io`] when the file is missing or unreadable.
    pub async fn open(&self) -> BackupResult<(ByteStream, u64)> {
        open_stream(&self.path).await
    }

    /// Remove the staging file; reports whether a file was actually present.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Io`] when the file exists but cannot be removed.
    pub async fn discard(mut self) -> BackupResult<bool> {
        self.discarded = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => {
                // Let drop retry the removal.
                self.discarded = false;
                Err(BackupError::io("remove_staging", &self.path, err))
            }
        }
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if self.discarded {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => warn!(
                path = %self.path.display(),
                "staging file removed during unwind"
            ),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                path = %self.path.display(),
                error = %err,
                "failed to remove staging file during unwind"
            ),
        }
    }
}

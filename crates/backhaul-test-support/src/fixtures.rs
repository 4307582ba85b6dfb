//! Artifact builders and stream helpers.

use std::io;

use backhaul_core::transfer::ByteStream;
use backhaul_core::{Artifact, ArtifactId, LocationId};
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;

/// Fixed instant `offset_secs` after 2025-11-29T00:00:00Z.
#[must_use]
pub fn instant(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 29, 0, 0, 0)
        .single()
        .map(|base| base + chrono::Duration::seconds(offset_secs))
        .unwrap_or_default()
}

/// Artifact named `{id}.tar.gz` created `offset_secs` after the fixture epoch.
#[must_use]
pub fn artifact(id: &str, location: &str, offset_secs: i64) -> Artifact {
    Artifact {
        id: ArtifactId::new(id),
        location: LocationId::new(location),
        name: format!("{id}.tar.gz"),
        created_at: instant(offset_secs),
        size_bytes: None,
    }
}

/// Stream that yields `content` split into chunks of `chunk` bytes.
#[must_use]
pub fn chunked(content: &[u8], chunk: usize) -> ByteStream {
    let parts: Vec<io::Result<Bytes>> = content
        .chunks(chunk.max(1))
        .map(|part| Ok(Bytes::copy_from_slice(part)))
        .collect();
    Box::pin(futures_util::stream::iter(parts))
}

/// Drain a stream into memory.
///
/// # Errors
///
/// Returns the first error the stream yields.
pub async fn collect(mut stream: ByteStream) -> io::Result<Vec<u8>> {
    let mut collected = Vec::new();
    while let Some(chunk) = stream.next().await {
        collected.extend_from_slice(&chunk?);
    }
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chunked_round_trips_through_collect() -> io::Result<()> {
        let content = b"0123456789abcdef";
        assert_eq!(collect(chunked(content, 3)).await?, content);
        Ok(())
    }

    #[test]
    fn artifacts_order_by_offset() {
        assert!(artifact("new", "f", 10).created_at > artifact("old", "f", 5).created_at);
    }
}

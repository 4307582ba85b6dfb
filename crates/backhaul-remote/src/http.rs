//! Shared request plumbing for the panel and Drive adapters.

use std::io;
use std::time::Duration;

use backhaul_core::transfer::{ByteStream, STALL_TIMEOUT, byte_stream};
use backhaul_core::{BackupError, BackupResult};
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::{Body, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Time allowed to establish a connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Budget for metadata requests; streaming transfers are bounded per read instead.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const RELAY_DEPTH: usize = 4;
const ERROR_BODY_LIMIT: usize = 512;

/// Build the HTTP client shared by both adapters.
///
/// # Errors
///
/// Returns [`BackupError::Transport`] if the TLS backend cannot be initialised.
pub fn build_client() -> BackupResult<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(STALL_TIMEOUT)
        .user_agent(concat!("backhaul/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| BackupError::transport("http.build_client", "client", err))
}

pub(crate) async fn send(
    operation: &'static str,
    target: &str,
    request: RequestBuilder,
) -> BackupResult<Response> {
    let response = request
        .send()
        .await
        .map_err(|err| BackupError::transport(operation, target, err))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    debug!(
        operation,
        target,
        status = status.as_u16(),
        body = %truncate(&body),
        "remote rejected request"
    );
    Err(BackupError::http_status(operation, target, status.as_u16()))
}

pub(crate) async fn decode<T: DeserializeOwned>(
    operation: &'static str,
    target: &str,
    response: Response,
) -> BackupResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|err| BackupError::transport(operation, target, err))
}

pub(crate) fn response_stream(response: Response) -> ByteStream {
    byte_stream(response.bytes_stream())
}

/// Feed a [`ByteStream`] into a request body through a bounded channel.
pub(crate) fn request_body(mut source: ByteStream) -> Body {
    let (sender, receiver) = mpsc::channel::<io::Result<Bytes>>(RELAY_DEPTH);
    tokio::spawn(async move {
        while let Some(chunk) = source.next().await {
            let failed = chunk.is_err();
            if sender.send(chunk).await.is_err() || failed {
                break;
            }
        }
    });
    Body::wrap_stream(ReceiverStream::new(receiver))
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        let long = "é".repeat(ERROR_BODY_LIMIT + 10);
        assert_eq!(truncate(&long).chars().count(), ERROR_BODY_LIMIT);
        assert_eq!(truncate("short"), "short");
    }
}

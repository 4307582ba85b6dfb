//! Google Drive v3 storage tier.
//!
//! # Design
//! - Uploads open a resumable session and stream the body in a single PUT.
//! - Listing follows `nextPageToken` until the folder is exhausted.
//! - The API host is injectable so tests can point at a local mock server.

use std::sync::Arc;

use async_trait::async_trait;
use backhaul_core::transfer::ByteStream;
use backhaul_core::{Artifact, ArtifactId, BackupError, BackupResult, LocationId, StorageTier};
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use url::Url;

use crate::http::{REQUEST_TIMEOUT, decode, request_body, response_stream, send};
use crate::token::TokenSource;

/// Content type recorded for uploaded snapshots.
pub const ARCHIVE_MIME: &str = "application/gzip";

const FILE_FIELDS: &str = "id,name,createdTime,size,parents";
const PAGE_SIZE: &str = "1000";

/// Drive-backed [`StorageTier`].
#[derive(Clone)]
pub struct DriveTier {
    client: Client,
    api_base: Url,
    token: Arc<dyn TokenSource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    created_time: DateTime<Utc>,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    parents: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

impl DriveFile {
    fn into_artifact(self, fallback: Option<&LocationId>) -> Artifact {
        let location = self
            .parents
            .first()
            .map(|parent| LocationId::new(parent.as_str()))
            .or_else(|| fallback.cloned())
            .unwrap_or_else(|| LocationId::new(""));
        Artifact {
            id: ArtifactId::new(self.id),
            location,
            name: self.name,
            created_at: self.created_time,
            size_bytes: self.size.and_then(|size| size.parse().ok()),
        }
    }
}

impl DriveTier {
    /// Build a tier talking to `api_base` (normally `https://www.googleapis.com`).
    #[must_use]
    pub fn new(client: Client, api_base: Url, token: Arc<dyn TokenSource>) -> Self {
        Self {
            client,
            api_base,
            token,
        }
    }

    fn url(&self, path: &str) -> BackupResult<Url> {
        let raw = format!("{}{path}", self.api_base.as_str().trim_end_matches('/'));
        Url::parse(&raw).map_err(|_| BackupError::InvalidInput {
            field: "drive_api_url",
            reason: "unparseable_endpoint",
            value: Some(raw),
        })
    }

    async fn authorized(&self, request: RequestBuilder) -> BackupResult<RequestBuilder> {
        let token = self.token.access_token().await?;
        Ok(request.bearer_auth(token))
    }

    async fn start_session(
        &self,
        location: &LocationId,
        name: &str,
        len: u64,
    ) -> BackupResult<Url> {
        let mut url = self.url("/upload/drive/v3/files")?;
        url.query_pairs_mut()
            .append_pair("uploadType", "resumable")
            .append_pair("fields", FILE_FIELDS);
        let request = self
            .authorized(self.client.post(url))
            .await?
            .header("X-Upload-Content-Type", ARCHIVE_MIME)
            .header("X-Upload-Content-Length", len.to_string())
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({
                "name": name,
                "parents": [location.as_str()],
                "mimeType": ARCHIVE_MIME,
            }));
        let response = send("drive.upload_session", name, request).await?;
        let session = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(BackupError::HttpStatus {
                operation: "drive.upload_session",
                target: name.to_string(),
                status: response.status().as_u16(),
            })?;
        Url::parse(session).map_err(|err| BackupError::transport("drive.upload_session", name, err))
    }
}

#[async_trait]
impl StorageTier for DriveTier {
    async fn list(&self, location: &LocationId) -> BackupResult<Vec<Artifact>> {
        let mut artifacts = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.url("/drive/v3/files")?;
            {
                let mut query = url.query_pairs_mut();
                query
                    .append_pair("q", &format!("'{location}' in parents and trashed=false"))
                    .append_pair("orderBy", "createdTime desc")
                    .append_pair("pageSize", PAGE_SIZE)
                    .append_pair(
                        "fields",
                        "nextPageToken,files(id,name,createdTime,size,parents)",
                    );
                if let Some(token) = page_token.as_deref() {
                    query.append_pair("pageToken", token);
                }
            }
            let request = self
                .authorized(self.client.get(url))
                .await?
                .timeout(REQUEST_TIMEOUT);
            let response = send("drive.list", location.as_str(), request).await?;
            let page: FileList = decode("drive.list", location.as_str(), response).await?;
            artifacts.extend(
                page.files
                    .into_iter()
                    .map(|file| file.into_artifact(Some(location))),
            );
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }
        info!(location = %location, count = artifacts.len(), "listed storage folder");
        Ok(artifacts)
    }

    async fn upload(
        &self,
        location: &LocationId,
        name: &str,
        body: ByteStream,
        len: u64,
    ) -> BackupResult<Artifact> {
        let session = self.start_session(location, name, len).await?;
        debug!(location = %location, file = name, "resumable session opened");
        let request = self
            .client
            .put(session)
            .header(CONTENT_TYPE, ARCHIVE_MIME)
            .header(CONTENT_LENGTH, len)
            .body(request_body(body));
        let response = send("drive.upload", name, request).await?;
        let file: DriveFile = decode("drive.upload", name, response).await?;
        let artifact = file.into_artifact(Some(location));
        info!(
            location = %location,
            file = %artifact.name,
            artifact_id = %artifact.id,
            bytes = len,
            "uploaded to storage"
        );
        Ok(artifact)
    }

    async fn delete(&self, id: &ArtifactId) -> BackupResult<()> {
        let url = self.url(&format!("/drive/v3/files/{id}"))?;
        let request = self
            .authorized(self.client.delete(url))
            .await?
            .timeout(REQUEST_TIMEOUT);
        send("drive.delete", id.as_str(), request).await?;
        debug!(artifact_id = %id, "storage artifact deleted");
        Ok(())
    }

    async fn metadata(&self, id: &ArtifactId) -> BackupResult<Artifact> {
        let mut url = self.url(&format!("/drive/v3/files/{id}"))?;
        url.query_pairs_mut().append_pair("fields", FILE_FIELDS);
        let request = self
            .authorized(self.client.get(url))
            .await?
            .timeout(REQUEST_TIMEOUT);
        let response = send("drive.metadata", id.as_str(), request).await?;
        let file: DriveFile = decode("drive.metadata", id.as_str(), response).await?;
        Ok(file.into_artifact(None))
    }

    async fn download(&self, id: &ArtifactId) -> BackupResult<ByteStream> {
        let mut url = self.url(&format!("/drive/v3/files/{id}"))?;
        url.query_pairs_mut().append_pair("alt", "media");
        let request = self.authorized(self.client.get(url)).await?;
        let response = send("drive.download", id.as_str(), request).await?;
        Ok(response_stream(response))
    }
}

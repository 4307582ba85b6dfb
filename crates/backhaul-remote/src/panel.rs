//! Pterodactyl client API adapter for the origin system.
//!
//! # Design
//! - Every call maps 1:1 onto a `/api/client/servers/{id}` endpoint; no retries here.
//! - Signed download and upload locators are used without panel credentials.
//! - Deleting a backup that no longer exists is treated as success.

use async_trait::async_trait;
use backhaul_core::transfer::ByteStream;
use backhaul_core::{
    Artifact, ArtifactId, BackupConstraint, BackupError, BackupId, BackupJob, BackupResult,
    BackupStatus, LocationId, OriginBackups,
};
use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use url::Url;

use crate::http::{REQUEST_TIMEOUT, decode, request_body, response_stream, send};

/// Connection details for one panel server.
#[derive(Clone)]
pub struct PanelClient {
    client: Client,
    base_url: Url,
    api_key: String,
    server_id: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    attributes: T,
}

#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    data: Vec<Envelope<T>>,
}

#[derive(Debug, Deserialize)]
struct BackupAttributes {
    uuid: String,
    #[serde(default)]
    name: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    is_successful: Option<bool>,
    #[serde(default)]
    bytes: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SignedUrl {
    url: String,
}

impl BackupAttributes {
    fn into_job(self) -> BackupJob {
        let status = match (self.is_successful, self.completed_at) {
            (Some(true), Some(_)) => BackupStatus::Succeeded,
            (Some(false), _) => BackupStatus::Failed,
            _ => BackupStatus::Pending,
        };
        BackupJob {
            id: BackupId::new(self.uuid),
            status,
            completed_at: self.completed_at,
        }
    }

    fn into_artifact(self, location: &LocationId) -> Artifact {
        Artifact {
            id: ArtifactId::new(self.uuid),
            location: location.clone(),
            name: self.name,
            created_at: self.created_at,
            size_bytes: self.bytes,
        }
    }
}

impl PanelClient {
    /// Build a client for `server_id` on the panel at `base_url`.
    #[must_use]
    pub fn new(
        client: Client,
        base_url: Url,
        api_key: impl Into<String>,
        server_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url,
            api_key: api_key.into(),
            server_id: server_id.into(),
        }
    }

    fn endpoint(&self, tail: &str) -> BackupResult<Url> {
        let raw = format!(
            "{}/api/client/servers/{}/{tail}",
            self.base_url.as_str().trim_end_matches('/'),
            self.server_id
        );
        Url::parse(&raw).map_err(|_| BackupError::InvalidInput {
            field: "panel_url",
            reason: "unparseable_endpoint",
            value: Some(raw),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.api_key)
            .header(ACCEPT, "application/json")
            .timeout(REQUEST_TIMEOUT)
    }

    async fn signed_url(&self, operation: &'static str, tail: &str) -> BackupResult<Url> {
        let url = self.endpoint(tail)?;
        let response = send(operation, tail, self.authorized(self.client.get(url))).await?;
        let signed: Envelope<SignedUrl> = decode(operation, tail, response).await?;
        Url::parse(&signed.attributes.url).map_err(|err| BackupError::transport(operation, tail, err))
    }

    async fn post_file_action(
        &self,
        operation: &'static str,
        tail: &str,
        body: serde_json::Value,
    ) -> BackupResult<()> {
        let url = self.endpoint(tail)?;
        send(
            operation,
            tail,
            self.authorized(self.client.post(url)).json(&body),
        )
        .await?;
        Ok(())
    }
}

/// The panel refuses download links for unfinished backups with 400 or 409.
fn not_ready(id: &BackupId, err: BackupError) -> BackupError {
    match err {
        BackupError::HttpStatus {
            status: 400 | 409, ..
        } => BackupError::NotReady {
            backup_id: id.clone(),
        },
        other => other,
    }
}

/// Request body restricting a snapshot to one relative path.
fn create_body(constraint: Option<&BackupConstraint>) -> serde_json::Value {
    match constraint {
        Some(constraint) => {
            let path = constraint.path();
            json!({ "ignored": format!("*\n!/{path}\n!/{path}/**") })
        }
        None => json!({}),
    }
}

#[async_trait]
impl OriginBackups for PanelClient {
    fn location(&self) -> LocationId {
        LocationId::new(self.server_id.as_str())
    }

    async fn list(&self) -> BackupResult<Vec<Artifact>> {
        let url = self.endpoint("backups")?;
        let response = send("panel.list", "backups", self.authorized(self.client.get(url))).await?;
        let listed: ListEnvelope<BackupAttributes> =
            decode("panel.list", "backups", response).await?;
        let location = self.location();
        let artifacts: Vec<Artifact> = listed
            .data
            .into_iter()
            .map(|entry| entry.attributes.into_artifact(&location))
            .collect();
        info!(count = artifacts.len(), "listed origin backups");
        Ok(artifacts)
    }

    async fn create(&self, constraint: Option<&BackupConstraint>) -> BackupResult<BackupJob> {
        let url = self.endpoint("backups")?;
        let response = send(
            "panel.create",
            "backups",
            self.authorized(self.client.post(url)).json(&create_body(constraint)),
        )
        .await?;
        let created: Envelope<BackupAttributes> =
            decode("panel.create", "backups", response).await?;
        let job = created.attributes.into_job();
        info!(backup_id = %job.id, "origin backup created");
        Ok(job)
    }

    async fn poll_status(&self, id: &BackupId) -> BackupResult<BackupJob> {
        let tail = format!("backups/{id}");
        let url = self.endpoint(&tail)?;
        let response = send("panel.status", &tail, self.authorized(self.client.get(url))).await?;
        let current: Envelope<BackupAttributes> = decode("panel.status", &tail, response).await?;
        Ok(current.attributes.into_job())
    }

    async fn download_locator(&self, id: &BackupId) -> BackupResult<Url> {
        let locator = self
            .signed_url("panel.download_locator", &format!("backups/{id}/download"))
            .await
            .map_err(|err| not_ready(id, err))?;
        debug!(backup_id = %id, "download locator obtained");
        Ok(locator)
    }

    async fn fetch(&self, locator: &Url) -> BackupResult<ByteStream> {
        let response = send(
            "panel.fetch",
            "download_locator",
            self.client.get(locator.clone()),
        )
        .await?;
        Ok(response_stream(response))
    }

    async fn delete(&self, id: &BackupId) -> BackupResult<()> {
        let tail = format!("backups/{id}");
        let url = self.endpoint(&tail)?;
        match send("panel.delete", &tail, self.authorized(self.client.delete(url))).await {
            Ok(_) => {
                info!(backup_id = %id, "origin backup deleted");
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                info!(backup_id = %id, "origin backup already absent");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn upload_locator(&self) -> BackupResult<Url> {
        self.signed_url("panel.upload_locator", "files/upload").await
    }

    async fn upload_file(
        &self,
        locator: &Url,
        name: &str,
        body: ByteStream,
        len: u64,
    ) -> BackupResult<()> {
        let mut target = locator.clone();
        target.query_pairs_mut().append_pair("directory", "/");
        let part = Part::stream_with_length(request_body(body), len).file_name(name.to_string());
        let form = Form::new().part("files", part);
        send(
            "panel.upload_file",
            "upload_locator",
            self.client.post(target).multipart(form),
        )
        .await?;
        info!(file = name, bytes = len, "file uploaded to origin");
        Ok(())
    }

    async fn decompress(&self, name: &str) -> BackupResult<()> {
        self.post_file_action(
            "panel.decompress",
            "files/decompress",
            json!({ "root": "/", "file": name }),
        )
        .await?;
        info!(file = name, "archive decompressed on origin");
        Ok(())
    }

    async fn delete_file(&self, name: &str) -> BackupResult<()> {
        self.post_file_action(
            "panel.delete_file",
            "files/delete",
            json!({ "root": "/", "files": [name] }),
        )
        .await?;
        info!(file = name, "file removed from origin");
        Ok(())
    }
}

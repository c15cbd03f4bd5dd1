//! Google Drive folder storage authenticated by a bearer access token.
//!
//! Uploads use the two-phase resumable protocol: a metadata POST opens an
//! upload session, then the file body is streamed to the session URL. The
//! id Drive assigns to the new file becomes the remote key.

use std::path::Path;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{header, Client, Response};
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use super::{error::*, prefixed_key, require, CloudProvider, ProviderSettings, UploadOutcome};
use crate::sandbox::Sandbox;

const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDriveConfig {
    pub access_token: Option<String>,
    pub folder_id: Option<String>,
    pub prefix: Option<String>,
    pub dry_run: Option<bool>,
    pub mock_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DriveConfig {
    pub access_token: String,
    pub folder_id: String,
    pub prefix: Option<String>,
    pub dry_run: bool,
    pub mock_dir: Option<String>,
}

impl DriveConfig {
    pub fn validate(raw: RawDriveConfig) -> Result<Self> {
        Ok(Self {
            access_token: require("accessToken", raw.access_token)?,
            folder_id: require("folderId", raw.folder_id)?,
            prefix: raw.prefix,
            dry_run: raw.dry_run.unwrap_or(false),
            mock_dir: raw.mock_dir.filter(|d| !d.trim().is_empty()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    name: Option<String>,
}

pub struct GoogleDriveProvider {
    config: DriveConfig,
    client: Client,
    upload_url: String,
    files_url: String,
    /// Only set in dry-run mode
    sandbox: Option<Sandbox>,
}

impl GoogleDriveProvider {
    pub fn new(raw: RawDriveConfig, settings: &ProviderSettings) -> Result<Self> {
        let config = DriveConfig::validate(raw)?;
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| Error::Provider(format!("failed to create http client: {}", e)))?;
        let sandbox = config.dry_run.then(|| match &config.mock_dir {
            Some(dir) => Sandbox::new(dir),
            None => Sandbox::new(settings.mock_storage_path.join("google_drive")),
        });
        Ok(Self {
            config,
            client,
            upload_url: UPLOAD_URL.to_string(),
            files_url: FILES_URL.to_string(),
            sandbox,
        })
    }

    ///
    /// Points the provider at another Drive-compatible host, bypassing any
    /// proxy the environment configures
    ///
    #[cfg(test)]
    fn with_endpoints(mut self, base_url: &str) -> Self {
        self.client = Client::builder()
            .no_proxy()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap();
        self.upload_url = format!("{}/upload", base_url);
        self.files_url = format!("{}/files", base_url);
        self
    }

    ///
    /// Drive folders are flat, so the prefixed key is folded into one file name
    ///
    fn file_name(&self, remote_key_hint: &str) -> String {
        prefixed_key(self.config.prefix.as_deref(), remote_key_hint).replace('/', "_")
    }

    async fn open_session(&self, file_name: &str, size: u64) -> Result<String> {
        let response = self.client.post(&self.upload_url)
            .query(&[("uploadType", "resumable")])
            .bearer_auth(&self.config.access_token)
            .header("X-Upload-Content-Type", "application/octet-stream")
            .header("X-Upload-Content-Length", size)
            .json(&json!({ "name": file_name, "parents": [self.config.folder_id] }))
            .send().await?;
        let response = ensure_success(response, "open upload session").await?;

        response.headers().get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .ok_or_else(|| Error::Provider("drive returned no upload session url".to_string()))
    }
}

#[async_trait]
impl CloudProvider for GoogleDriveProvider {
    async fn upload(&self, source_path: &Path, remote_key_hint: &str) -> Result<UploadOutcome> {
        let file_name = self.file_name(remote_key_hint);

        if let Some(sandbox) = &self.sandbox {
            let key = format!("{}/{}", self.config.folder_id, file_name);
            sandbox.store(source_path, &key).await?;
            info!(folder = %self.config.folder_id, file = %file_name, "dry-run drive upload");
            return Ok(UploadOutcome {
                provider_metadata: json!({ "fileId": key, "fileName": file_name, "dryRun": true }),
                remote_key: key,
            });
        }

        let size = tokio::fs::metadata(source_path).await?.len();
        let session_url = self.open_session(&file_name, size).await?;

        let file = tokio::fs::File::open(source_path).await?;
        let response = self.client.put(&session_url)
            .header(header::CONTENT_LENGTH, size)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send().await?;
        let created: DriveFile = ensure_success(response, "upload file body").await?
            .json().await?;

        info!(folder = %self.config.folder_id, file_id = %created.id, "drive upload complete");
        Ok(UploadOutcome {
            provider_metadata: json!({
                "fileId": created.id,
                "fileName": created.name.unwrap_or(file_name),
            }),
            remote_key: created.id,
        })
    }

    async fn download(&self, remote_key: &str, provider_metadata: &serde_json::Value, output_path: &Path) -> Result<()> {
        let file_id = provider_metadata.get("fileId")
            .and_then(|v| v.as_str())
            .unwrap_or(remote_key);

        if let Some(sandbox) = &self.sandbox {
            sandbox.fetch(file_id, output_path).await?;
            debug!(file_id, "dry-run drive download");
            return Ok(());
        }

        let response = self.client.get(format!("{}/{}", self.files_url, file_id))
            .query(&[("alt", "media")])
            .bearer_auth(&self.config.access_token)
            .send().await?;
        let response = ensure_success(response, "download file").await?;

        let mut file = tokio::fs::File::create(output_path).await?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;

        debug!(file_id, "drive download complete");
        Ok(())
    }
}

///
/// Passes a successful response through; otherwise turns it into a provider
/// error carrying the status and a capped excerpt of the body
///
async fn ensure_success(response: Response, action: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Provider(format!("{} failed with status {}: {}", action, status, excerpt(&body))))
}

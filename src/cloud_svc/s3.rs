//! S3-compatible object storage, via the rust-s3 crate.
//!
//! Works against AWS S3 or any S3-compatible endpoint (MinIO etc). With
//! `dryRun` set, objects are copied into a local sandbox instead.

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use s3::{bucket::Bucket, creds::Credentials, region::Region};
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{error::*, prefixed_key, require, CloudProvider, ProviderSettings, UploadOutcome};
use crate::sandbox::Sandbox;

/// Destination config exactly as the operator supplied it
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawS3Config {
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub prefix: Option<String>,
    pub endpoint: Option<String>,
    pub force_path_style: Option<bool>,
    pub dry_run: Option<bool>,
    pub mock_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub prefix: Option<String>,
    pub endpoint: Option<String>,
    pub force_path_style: bool,
    pub dry_run: bool,
    pub mock_dir: Option<String>,
}

impl S3Config {
    pub fn validate(raw: RawS3Config) -> Result<Self> {
        let endpoint = raw.endpoint.filter(|e| !e.trim().is_empty());
        Ok(Self {
            bucket: require("bucket", raw.bucket)?,
            region: require("region", raw.region)?,
            access_key_id: require("accessKeyId", raw.access_key_id)?,
            secret_access_key: require("secretAccessKey", raw.secret_access_key)?,
            prefix: raw.prefix,
            force_path_style: raw.force_path_style.unwrap_or(endpoint.is_some()),
            endpoint,
            dry_run: raw.dry_run.unwrap_or(false),
            mock_dir: raw.mock_dir.filter(|d| !d.trim().is_empty()),
        })
    }
}

pub struct S3Provider {
    config: S3Config,
    timeout: Duration,
    /// Only set in dry-run mode
    sandbox: Option<Sandbox>,
}

impl S3Provider {
    pub fn new(raw: RawS3Config, settings: &ProviderSettings) -> Result<Self> {
        let config = S3Config::validate(raw)?;
        let sandbox = config.dry_run.then(|| match &config.mock_dir {
            Some(dir) => Sandbox::new(dir),
            None => Sandbox::new(settings.mock_storage_path.join("s3").join(&config.bucket)),
        });
        Ok(Self { config, timeout: settings.timeout, sandbox })
    }

    fn bucket(&self) -> Result<Box<Bucket>> {
        let credentials = Credentials::new(
            Some(&self.config.access_key_id), Some(&self.config.secret_access_key), None, None, None
        ).map_err(|e| Error::Validation(format!("invalid s3 credentials: {}", e)))?;

        let region = match &self.config.endpoint {
            Some(endpoint) => Region::Custom { region: self.config.region.clone(), endpoint: endpoint.clone() },
            None => self.config.region.parse()
                .map_err(|_| Error::Validation(format!("invalid s3 region: {}", self.config.region)))?,
        };

        let bucket = Bucket::new(&self.config.bucket, region, credentials)
            .and_then(|b| b.with_request_timeout(self.timeout))
            .map_err(|e| Error::Provider(excerpt(&e.to_string())))?;
        Ok(if self.config.force_path_style { bucket.with_path_style() } else { bucket })
    }
}

#[async_trait]
impl CloudProvider for S3Provider {
    async fn upload(&self, source_path: &Path, remote_key_hint: &str) -> Result<UploadOutcome> {
        let remote_key = prefixed_key(self.config.prefix.as_deref(), remote_key_hint);

        if let Some(sandbox) = &self.sandbox {
            let stored = sandbox.store(source_path, &remote_key).await?;
            info!(bucket = %self.config.bucket, key = %remote_key, "dry-run s3 upload");
            return Ok(UploadOutcome {
                remote_key,
                provider_metadata: json!({
                    "bucket": self.config.bucket,
                    "dryRun": true,
                    "mockPath": stored.to_string_lossy(),
                }),
            });
        }

        let bucket = self.bucket()?;
        let mut file = tokio::fs::File::open(source_path).await?;
        let response = bucket.put_object_stream(&mut file, &remote_key).await
            .map_err(|e| Error::Provider(format!("put '{}' failed: {}", remote_key, excerpt(&e.to_string()))))?;
        if !(200..300).contains(&response.status_code()) {
            return Err(Error::Provider(format!("put '{}' failed with status {}", remote_key, response.status_code())));
        }

        info!(bucket = %self.config.bucket, key = %remote_key, "s3 upload complete");
        Ok(UploadOutcome {
            remote_key,
            provider_metadata: json!({ "bucket": self.config.bucket, "region": self.config.region }),
        })
    }

    async fn download(&self, remote_key: &str, _provider_metadata: &serde_json::Value, output_path: &Path) -> Result<()> {
        if let Some(sandbox) = &self.sandbox {
            sandbox.fetch(remote_key, output_path).await?;
            debug!(key = %remote_key, "dry-run s3 download");
            return Ok(());
        }

        let bucket = self.bucket()?;
        let mut file = tokio::fs::File::create(output_path).await?;
        let status = bucket.get_object_to_writer(remote_key, &mut file).await
            .map_err(|e| Error::Provider(format!("get '{}' failed: {}", remote_key, excerpt(&e.to_string()))))?;
        if !(200..300).contains(&status) {
            return Err(Error::Provider(format!("get '{}' failed with status {}", remote_key, status)));
        }
        file.flush().await?;

        debug!(key = %remote_key, "s3 download complete");
        Ok(())
    }
}

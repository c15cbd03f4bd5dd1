pub mod error;
pub mod google_drive;
pub mod s3;

use std::{path::{Path, PathBuf}, time::Duration};

use async_trait::async_trait;
use serde::de::DeserializeOwned;

#[cfg(test)]
use mockall::automock;

use crate::repository::models::ProviderKind;
use error::*;

pub use google_drive::GoogleDriveProvider;
pub use s3::S3Provider;

#[derive(Clone, Debug, PartialEq)]
pub struct UploadOutcome {
    /// Key (or provider-assigned id) the object can be fetched back with
    pub remote_key: String,
    pub provider_metadata: serde_json::Value,
}

///
/// Uniform upload/download contract over the remote storage families
///
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CloudProvider : Send + Sync {
    ///
    /// Streams the file at `source_path` to remote storage. `remote_key_hint`
    /// is the provider-independent name; the provider may namespace it or
    /// replace it with an id of its own
    ///
    async fn upload(&self, source_path: &Path, remote_key_hint: &str) -> Result<UploadOutcome>;
    ///
    /// Streams the object back into `output_path`
    ///
    async fn download(&self, remote_key: &str, provider_metadata: &serde_json::Value, output_path: &Path) -> Result<()>;
}

///
/// Process-wide knobs shared by every provider instance
///
#[derive(Clone, Debug)]
pub struct ProviderSettings {
    /// Root for dry-run sandboxes when a destination sets no `mockDir`
    pub mock_storage_path: PathBuf,
    pub timeout: Duration,
}

///
/// Builds the provider for a destination, validating its config on the way
///
pub fn provider_for(
    provider: ProviderKind, config: &serde_json::Value, settings: &ProviderSettings
) -> Result<Box<dyn CloudProvider>> {
    Ok(match provider {
        ProviderKind::S3 => Box::new(S3Provider::new(parse_config(config)?, settings)?),
        ProviderKind::GoogleDrive => Box::new(GoogleDriveProvider::new(parse_config(config)?, settings)?),
    })
}

///
/// Checks a destination config without building a provider
///
pub fn validate_config(provider: ProviderKind, config: &serde_json::Value) -> Result<()> {
    match provider {
        ProviderKind::S3 => s3::S3Config::validate(parse_config(config)?).map(|_| ()),
        ProviderKind::GoogleDrive => google_drive::DriveConfig::validate(parse_config(config)?).map(|_| ()),
    }
}

fn parse_config<T: DeserializeOwned>(config: &serde_json::Value) -> Result<T> {
    serde_json::from_value(config.clone()).map_err(|e| Error::Validation(e.to_string()))
}

///
/// Returns the trimmed value of a required string field, or a validation
/// error naming the field
///
pub(crate) fn require(field: &str, value: Option<String>) -> Result<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::Validation(format!("{} is required", field))),
    }
}

///
/// Joins an optional destination prefix onto a key
///
pub(crate) fn prefixed_key(prefix: Option<&str>, key: &str) -> String {
    match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}/{}", prefix, key),
        None => key.to_string(),
    }
}

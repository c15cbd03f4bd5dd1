use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

use crate::crypto_svc::Envelope;

#[derive(Clone, Copy, Debug, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// S3-compatible object storage
    S3,
    /// Token-authenticated Google Drive folder
    GoogleDrive,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::S3 => write!(f, "s3"),
            ProviderKind::GoogleDrive => write!(f, "google_drive"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s3" => Ok(ProviderKind::S3),
            "google_drive" => Ok(ProviderKind::GoogleDrive),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RestoreSource {
    Local,
    Cloud,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Uploaded,
    Failed,
}

#[derive(Clone, Debug, sqlx::FromRow, Serialize)]
pub struct ServerModel {
    pub id: i64,
    pub name: String,
    pub working_dir: String,
    pub runtime_executable: Option<String>,
}

#[derive(Clone, Debug, sqlx::FromRow, Serialize)]
pub struct BackupModel {
    pub id: i64,
    pub server_id: i64,
    pub file_path: String,
    pub size_bytes: i64,
    pub pre_restore: bool,
    pub created_at: NaiveDateTime,
    pub restored_at: Option<NaiveDateTime>,
}

pub struct NewBackup {
    pub server_id: i64,
    pub file_path: String,
    pub size_bytes: i64,
    pub pre_restore: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow, Serialize)]
pub struct CloudDestinationModel {
    pub id: i64,
    pub server_id: i64,
    pub provider: ProviderKind,
    pub name: String,
    pub config: Json<serde_json::Value>,
    #[serde(skip_serializing)]
    pub passphrase: String,
    pub enabled: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

///
/// The operator-facing view of a destination. Never carries the passphrase
///
#[derive(Clone, Debug, Serialize)]
pub struct CloudDestinationSummary {
    pub id: i64,
    pub server_id: i64,
    pub provider: ProviderKind,
    pub name: String,
    pub config: serde_json::Value,
    pub enabled: bool,
    pub has_passphrase: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<CloudDestinationModel> for CloudDestinationSummary {
    fn from(value: CloudDestinationModel) -> Self {
        Self {
            id: value.id,
            server_id: value.server_id,
            provider: value.provider,
            name: value.name,
            config: value.config.0,
            enabled: value.enabled,
            has_passphrase: !value.passphrase.is_empty(),
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

pub struct NewCloudDestination {
    pub server_id: i64,
    pub provider: ProviderKind,
    pub name: String,
    pub config: serde_json::Value,
    pub passphrase: String,
    pub enabled: bool,
    pub created_at: NaiveDateTime,
}

///
/// Everything besides the ciphertext needed to bring an artifact back:
/// the encryption envelope and whatever the provider handed back on upload
///
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ArtifactMetadata {
    pub encryption: Envelope,
    #[serde(default)]
    pub provider: serde_json::Value,
}

#[derive(Clone, Debug, sqlx::FromRow, Serialize)]
pub struct CloudArtifactModel {
    pub id: i64,
    pub backup_id: i64,
    pub server_id: i64,
    pub destination_id: i64,
    pub remote_key: String,
    pub checksum: String,
    pub encrypted: bool,
    pub size_bytes: i64,
    pub metadata: Json<ArtifactMetadata>,
    pub status: ArtifactStatus,
    pub created_at: NaiveDateTime,
}

pub struct NewCloudArtifact {
    pub backup_id: i64,
    pub server_id: i64,
    pub destination_id: i64,
    pub remote_key: String,
    pub checksum: String,
    pub size_bytes: i64,
    pub metadata: ArtifactMetadata,
    pub status: ArtifactStatus,
    pub created_at: NaiveDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow, Serialize)]
pub struct RestoreEventModel {
    pub id: i64,
    pub server_id: i64,
    pub backup_id: i64,
    pub source: RestoreSource,
    pub success: bool,
    pub verified: bool,
    pub detail: Option<String>,
    pub duration_ms: i64,
    pub created_at: NaiveDateTime,
}

pub struct NewRestoreEvent {
    pub server_id: i64,
    pub backup_id: i64,
    pub source: RestoreSource,
    pub success: bool,
    pub verified: bool,
    pub detail: Option<String>,
    pub duration_ms: i64,
    pub created_at: NaiveDateTime,
}

use std::{future::Future, path::PathBuf, time::Instant};

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::{error::*, sanitize_name, FileBackupService, RestoreAttempt, RestoreOutcome};
use crate::{
    cloud_svc::{self, provider_for},
    crypto_svc,
    integrity_svc::checksum_file,
    repository::models::*,
};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudDestinationInput {
    pub provider: ProviderKind,
    pub name: String,
    pub config: serde_json::Value,
    pub passphrase: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

///
/// Partial update of a destination; unset fields are left untouched
///
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudDestinationPatch {
    pub name: Option<String>,
    pub config: Option<serde_json::Value>,
    pub passphrase: Option<String>,
    pub enabled: Option<bool>,
}

///
/// Encrypted replication of backups to remote destinations, and restores
/// back from them
///
pub trait CloudBackupService {
    fn list_cloud_destinations(&self, server_id: i64) -> impl Future<Output = Result<Vec<CloudDestinationSummary>>> + Send;
    ///
    /// Validates the provider config and stores a new destination
    ///
    fn create_cloud_destination(&self, server_id: i64, input: CloudDestinationInput) -> impl Future<Output = Result<CloudDestinationSummary>> + Send;
    fn update_cloud_destination(&self, server_id: i64, destination_id: i64, patch: CloudDestinationPatch) -> impl Future<Output = Result<CloudDestinationSummary>> + Send;
    fn delete_cloud_destination(&self, server_id: i64, destination_id: i64) -> impl Future<Output = Result<()>> + Send;
    fn list_cloud_artifacts(&self, server_id: i64) -> impl Future<Output = Result<Vec<CloudArtifactModel>>> + Send;
    ///
    /// Encrypts a local backup, ships the ciphertext to the destination and
    /// records the resulting artifact together with its envelope
    ///
    fn upload_backup_to_cloud(&self, server_id: i64, backup_id: i64, destination_id: i64) -> impl Future<Output = Result<CloudArtifactModel>> + Send;
    ///
    /// Downloads, checks, decrypts and restores an artifact. The live
    /// directory is not touched unless the downloaded ciphertext matches
    /// the recorded checksum
    ///
    fn restore_cloud_artifact(&self, server_id: i64, artifact_id: i64) -> impl Future<Output = Result<RestoreOutcome>> + Send;
}

impl<'a> FileBackupService<'a> {
    async fn get_server_destination(&self, server_id: i64, destination_id: i64) -> Result<CloudDestinationModel> {
        self.data_layer.get_destination(destination_id).await?
            .filter(|d| d.server_id == server_id)
            .ok_or_else(|| Error::NotFound(format!("cloud destination {} of server {}", destination_id, server_id)))
    }

    async fn restore_cloud(&self, server_id: i64, artifact_id: i64, attempt: &mut RestoreAttempt) -> Result<RestoreOutcome> {
        let server = self.get_server(server_id).await?;
        let artifact = self.data_layer.get_artifact(artifact_id).await?
            .filter(|a| a.server_id == server_id)
            .ok_or_else(|| Error::NotFound(format!("cloud artifact {} of server {}", artifact_id, server_id)))?;
        attempt.backup_id = artifact.backup_id;
        if artifact.status != ArtifactStatus::Uploaded {
            return Err(Error::Validation(format!("cloud artifact {} was never uploaded", artifact.id)));
        }
        let destination = self.get_server_destination(server_id, artifact.destination_id).await?;
        let metadata = &artifact.metadata.0;

        let provider = provider_for(destination.provider, &destination.config.0, &self.provider_settings())?;

        // Both scratch files are removed when they go out of scope
        let ciphertext = self.scratch_path("download-", ".enc").await?;
        provider.download(&artifact.remote_key, &metadata.provider, &ciphertext).await?;

        let checksum = checksum_file(&ciphertext).await?;
        if checksum != artifact.checksum {
            return Err(Error::Integrity(format!(
                "checksum mismatch for artifact {}: expected {}, downloaded {}",
                artifact.id, artifact.checksum, checksum
            )));
        }

        let plaintext = self.scratch_path("restore-", ".tar.gz").await?;
        crypto_svc::decrypt(&ciphertext, &plaintext, &destination.passphrase, &metadata.encryption).await?;

        let outcome = self.restore_from_archive(&server, &plaintext, attempt).await?;
        self.data_layer.mark_backup_restored(artifact.backup_id, self.time_provider.naive_utc_now()).await?;
        Ok(outcome)
    }
}

impl<'a> CloudBackupService for FileBackupService<'a> {
    async fn list_cloud_destinations(&self, server_id: i64) -> Result<Vec<CloudDestinationSummary>> {
        Ok(self.data_layer.list_destinations(server_id).await?
            .into_iter()
            .map(CloudDestinationSummary::from)
            .collect())
    }

    async fn create_cloud_destination(&self, server_id: i64, input: CloudDestinationInput) -> Result<CloudDestinationSummary> {
        self.get_server(server_id).await?;
        if input.name.trim().is_empty() {
            return Err(Error::Validation("name is required".to_string()));
        }
        if input.passphrase.is_empty() {
            return Err(Error::Validation("passphrase is required".to_string()));
        }
        cloud_svc::validate_config(input.provider, &input.config)?;

        let destination_id = self.data_layer.create_destination(&NewCloudDestination {
            server_id,
            provider: input.provider,
            name: input.name.trim().to_string(),
            config: input.config,
            passphrase: input.passphrase,
            enabled: input.enabled,
            created_at: self.time_provider.naive_utc_now(),
        }).await?;

        info!(server_id, destination_id, provider = %input.provider, "cloud destination created");
        Ok(self.get_server_destination(server_id, destination_id).await?.into())
    }

    async fn update_cloud_destination(&self, server_id: i64, destination_id: i64, patch: CloudDestinationPatch) -> Result<CloudDestinationSummary> {
        let mut destination = self.get_server_destination(server_id, destination_id).await?;

        if let Some(name) = patch.name {
            if name.trim().is_empty() {
                return Err(Error::Validation("name is required".to_string()));
            }
            destination.name = name.trim().to_string();
        }
        if let Some(config) = patch.config {
            cloud_svc::validate_config(destination.provider, &config)?;
            destination.config.0 = config;
        }
        if let Some(passphrase) = patch.passphrase {
            if passphrase.is_empty() {
                return Err(Error::Validation("passphrase is required".to_string()));
            }
            destination.passphrase = passphrase;
        }
        if let Some(enabled) = patch.enabled {
            destination.enabled = enabled;
        }
        destination.updated_at = self.time_provider.naive_utc_now();

        self.data_layer.update_destination(&destination).await?;
        info!(server_id, destination_id, "cloud destination updated");
        Ok(destination.into())
    }

    async fn delete_cloud_destination(&self, server_id: i64, destination_id: i64) -> Result<()> {
        self.get_server_destination(server_id, destination_id).await?;
        self.data_layer.delete_destination(destination_id).await?;
        info!(server_id, destination_id, "cloud destination deleted");
        Ok(())
    }

    async fn list_cloud_artifacts(&self, server_id: i64) -> Result<Vec<CloudArtifactModel>> {
        Ok(self.data_layer.list_artifacts(server_id).await?)
    }

    async fn upload_backup_to_cloud(&self, server_id: i64, backup_id: i64, destination_id: i64) -> Result<CloudArtifactModel> {
        let server = self.get_server(server_id).await?;
        let backup = self.get_server_backup(server_id, backup_id).await?;
        let destination = self.get_server_destination(server_id, destination_id).await?;
        if !destination.enabled {
            return Err(Error::Validation(format!("cloud destination {} is disabled", destination_id)));
        }

        let archive_path = PathBuf::from(&backup.file_path);
        if !tokio::fs::try_exists(&archive_path).await? {
            return Err(Error::Filesystem(format!("backup file {} is missing", archive_path.display())));
        }
        let provider = provider_for(destination.provider, &destination.config.0, &self.provider_settings())?;

        let ciphertext = self.scratch_path("upload-", ".enc").await?;
        let envelope = crypto_svc::encrypt(&archive_path, &ciphertext, &destination.passphrase).await?;
        let checksum = checksum_file(&ciphertext).await?;
        let size_bytes = tokio::fs::metadata(&ciphertext).await?.len() as i64;

        let hint = format!("{}/{}.tar.gz.enc", sanitize_name(&server.name), backup.id);
        let mut artifact = NewCloudArtifact {
            backup_id: backup.id,
            server_id,
            destination_id,
            remote_key: hint.clone(),
            checksum,
            size_bytes,
            metadata: ArtifactMetadata { encryption: envelope, provider: serde_json::Value::Null },
            status: ArtifactStatus::Uploaded,
            created_at: self.time_provider.naive_utc_now(),
        };

        match provider.upload(&ciphertext, &hint).await {
            Ok(uploaded) => {
                artifact.remote_key = uploaded.remote_key;
                artifact.metadata.provider = uploaded.provider_metadata;
            }
            Err(e) => {
                let error = Error::from(e);
                // Keep a record of the attempt; it can never be restored from
                artifact.status = ArtifactStatus::Failed;
                artifact.metadata.provider = json!({ "error": error.to_string() });
                let artifact_id = self.data_layer.create_artifact(&artifact).await?;
                warn!(server_id, backup_id, destination_id, artifact_id, error = %error, "backup upload failed");
                return Err(error);
            }
        }

        let artifact_id = self.data_layer.create_artifact(&artifact).await?;
        info!(server_id, backup_id, destination_id, artifact_id, remote_key = %artifact.remote_key, "backup uploaded");
        self.data_layer.get_artifact(artifact_id).await?
            .ok_or_else(|| Error::NotFound(format!("cloud artifact {}", artifact_id)))
    }

    async fn restore_cloud_artifact(&self, server_id: i64, artifact_id: i64) -> Result<RestoreOutcome> {
        let started = Instant::now();
        let mut attempt = RestoreAttempt::default();

        let result = self.restore_cloud(server_id, artifact_id, &mut attempt).await;
        if let Err(e) = &result {
            warn!(server_id, artifact_id, error = %e, "cloud restore aborted");
        }
        self.record_restore(server_id, RestoreSource::Cloud, &attempt, &result, started).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        backup_service::{tests::*, BackupKind, BackupService},
        repository::{DataLayer, DbDataLayer},
    };

    fn dry_run_s3(mock_dir: &std::path::Path) -> CloudDestinationInput {
        CloudDestinationInput {
            provider: ProviderKind::S3,
            name: "offsite".to_string(),
            config: json!({
                "bucket": "saves",
                "region": "us-east-1",
                "accessKeyId": "AKIA",
                "secretAccessKey": "secret",
                "prefix": "integration",
                "dryRun": true,
                "mockDir": mock_dir.to_string_lossy(),
            }),
            passphrase: "correct-horse".to_string(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_destination_crud_hides_passphrase() {
        let fx = fixture().await;
        let data_layer = DbDataLayer::new(&fx.db);
        let clock = mock_clock();
        let svc = FileBackupService::new(&data_layer, &clock, &fx.config);
        let server_id = data_layer.create_server("alpha", &fx.live_dir.to_string_lossy(), None).await.unwrap();

        let created = svc.create_cloud_destination(server_id, dry_run_s3(&fx.config.mock_storage_path)).await.unwrap();
        assert!(created.has_passphrase);
        let serialized = serde_json::to_string(&created).unwrap();
        assert!(!serialized.contains("correct-horse"));

        let updated = svc.update_cloud_destination(server_id, created.id, CloudDestinationPatch {
            name: Some("renamed".to_string()),
            enabled: Some(false),
            ..Default::default()
        }).await.unwrap();
        assert_eq!(updated.name, "renamed");
        assert!(!updated.enabled);

        let bad = svc.update_cloud_destination(server_id, created.id, CloudDestinationPatch {
            config: Some(json!({ "bucket": "saves" })),
            ..Default::default()
        }).await;
        assert!(matches!(bad, Err(Error::Validation(_))));

        svc.delete_cloud_destination(server_id, created.id).await.unwrap();
        assert!(svc.list_cloud_destinations(server_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_destination_requires_fields() {
        let fx = fixture().await;
        let data_layer = DbDataLayer::new(&fx.db);
        let clock = mock_clock();
        let svc = FileBackupService::new(&data_layer, &clock, &fx.config);
        let server_id = data_layer.create_server("alpha", &fx.live_dir.to_string_lossy(), None).await.unwrap();

        let mut input = dry_run_s3(&fx.config.mock_storage_path);
        input.config = json!({ "bucket": "saves", "region": "us-east-1", "secretAccessKey": "s" });
        match svc.create_cloud_destination(server_id, input).await {
            Err(Error::Validation(msg)) => assert!(msg.contains("accessKeyId")),
            other => panic!("expected validation error, got {:?}", other.err()),
        }

        let mut input = dry_run_s3(&fx.config.mock_storage_path);
        input.passphrase = String::new();
        assert!(matches!(svc.create_cloud_destination(server_id, input).await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_upload_then_restore_round_trip() {
        let fx = fixture().await;
        let data_layer = DbDataLayer::new(&fx.db);
        let clock = mock_clock();
        let svc = FileBackupService::new(&data_layer, &clock, &fx.config);

        write(&fx.live_dir, "server.properties", "motd=cloud");
        write(&fx.live_dir, "world/level.dat", "level");
        let server_id = data_layer.create_server("cloud-backup-server", &fx.live_dir.to_string_lossy(), None).await.unwrap();
        let backup = svc.create_backup(server_id, BackupKind::Regular).await.unwrap().backup;
        let mock_root = fx.root.path().join("mock-root");
        let destination = svc.create_cloud_destination(server_id, dry_run_s3(&mock_root)).await.unwrap();

        let artifact = svc.upload_backup_to_cloud(server_id, backup.id, destination.id).await.unwrap();
        assert_eq!(artifact.remote_key, format!("integration/cloud-backup-server/{}.tar.gz.enc", backup.id));
        assert!(mock_root.join(&artifact.remote_key).exists());
        assert!(artifact.encrypted);
        assert_eq!(artifact.status, ArtifactStatus::Uploaded);
        assert_eq!(artifact.checksum, checksum_file(&mock_root.join(&artifact.remote_key)).await.unwrap());
        assert_eq!(artifact.metadata.0.encryption.algorithm, "aes-256-gcm");
        assert_eq!(std::fs::read_dir(&fx.config.temp_path).unwrap().count(), 0);

        write(&fx.live_dir, "server.properties", "motd=drifted");
        write(&fx.live_dir, "junk.log", "junk");

        let outcome = svc.restore_cloud_artifact(server_id, artifact.id).await.unwrap();
        assert_eq!(std::fs::read_to_string(fx.live_dir.join("server.properties")).unwrap(), "motd=cloud");
        assert_eq!(std::fs::read_to_string(fx.live_dir.join("world/level.dat")).unwrap(), "level");
        assert!(!fx.live_dir.join("junk.log").exists());
        assert_eq!(outcome.verification.entry_count, 3);
        assert_eq!(std::fs::read_dir(&fx.config.temp_path).unwrap().count(), 0);

        let events = svc.list_restore_events(server_id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, RestoreSource::Cloud);
        assert_eq!(events[0].backup_id, backup.id);
        assert!(events[0].success);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_aborts_before_touching_live_dir() {
        let fx = fixture().await;
        let data_layer = DbDataLayer::new(&fx.db);
        let clock = mock_clock();
        let svc = FileBackupService::new(&data_layer, &clock, &fx.config);

        write(&fx.live_dir, "state.txt", "original");
        let server_id = data_layer.create_server("alpha", &fx.live_dir.to_string_lossy(), None).await.unwrap();
        let backup = svc.create_backup(server_id, BackupKind::Regular).await.unwrap().backup;
        let destination = svc.create_cloud_destination(server_id, dry_run_s3(&fx.config.mock_storage_path)).await.unwrap();
        let artifact = svc.upload_backup_to_cloud(server_id, backup.id, destination.id).await.unwrap();

        write(&fx.live_dir, "state.txt", "drifted");
        sqlx::query("UPDATE cloud_artifacts SET checksum = ? WHERE id = ?")
            .bind("0".repeat(64))
            .bind(artifact.id)
            .execute(&fx.db).await.unwrap();

        let result = svc.restore_cloud_artifact(server_id, artifact.id).await;
        assert!(matches!(result, Err(Error::Integrity(_))));
        assert_eq!(std::fs::read_to_string(fx.live_dir.join("state.txt")).unwrap(), "drifted");
        // No pre-restore snapshot was taken either
        assert_eq!(svc.list_backups(server_id).await.unwrap().len(), 1);
        assert_eq!(std::fs::read_dir(&fx.config.temp_path).unwrap().count(), 0);

        let events = svc.list_restore_events(server_id).await.unwrap();
        assert!(!events[0].success);
        assert!(!events[0].verified);
    }

    #[tokio::test]
    async fn test_wrong_passphrase_aborts_before_touching_live_dir() {
        let fx = fixture().await;
        let data_layer = DbDataLayer::new(&fx.db);
        let clock = mock_clock();
        let svc = FileBackupService::new(&data_layer, &clock, &fx.config);

        write(&fx.live_dir, "state.txt", "original");
        let server_id = data_layer.create_server("alpha", &fx.live_dir.to_string_lossy(), None).await.unwrap();
        let backup = svc.create_backup(server_id, BackupKind::Regular).await.unwrap().backup;
        let destination = svc.create_cloud_destination(server_id, dry_run_s3(&fx.config.mock_storage_path)).await.unwrap();
        let artifact = svc.upload_backup_to_cloud(server_id, backup.id, destination.id).await.unwrap();

        svc.update_cloud_destination(server_id, destination.id, CloudDestinationPatch {
            passphrase: Some("wrong-horse".to_string()),
            ..Default::default()
        }).await.unwrap();
        write(&fx.live_dir, "state.txt", "drifted");

        let result = svc.restore_cloud_artifact(server_id, artifact.id).await;
        assert!(matches!(result, Err(Error::Crypto(crypto_svc::error::Error::AuthenticationFailed))));
        assert_eq!(std::fs::read_to_string(fx.live_dir.join("state.txt")).unwrap(), "drifted");
        assert_eq!(std::fs::read_dir(&fx.config.temp_path).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_destination_rejects_upload() {
        let fx = fixture().await;
        let data_layer = DbDataLayer::new(&fx.db);
        let clock = mock_clock();
        let svc = FileBackupService::new(&data_layer, &clock, &fx.config);

        write(&fx.live_dir, "state.txt", "original");
        let server_id = data_layer.create_server("alpha", &fx.live_dir.to_string_lossy(), None).await.unwrap();
        let backup = svc.create_backup(server_id, BackupKind::Regular).await.unwrap().backup;
        let mut input = dry_run_s3(&fx.config.mock_storage_path);
        input.enabled = false;
        let destination = svc.create_cloud_destination(server_id, input).await.unwrap();

        let result = svc.upload_backup_to_cloud(server_id, backup.id, destination.id).await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(svc.list_cloud_artifacts(server_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_upload_is_recorded_and_not_restorable() {
        let fx = fixture().await;
        let data_layer = DbDataLayer::new(&fx.db);
        let clock = mock_clock();
        let svc = FileBackupService::new(&data_layer, &clock, &fx.config);

        write(&fx.live_dir, "state.txt", "original");
        let server_id = data_layer.create_server("alpha", &fx.live_dir.to_string_lossy(), None).await.unwrap();
        let backup = svc.create_backup(server_id, BackupKind::Regular).await.unwrap().backup;

        // Nothing listens on port 1, so the put is refused
        let mut input = dry_run_s3(&fx.config.mock_storage_path);
        input.config = json!({
            "bucket": "saves",
            "region": "us-east-1",
            "accessKeyId": "AKIA",
            "secretAccessKey": "secret",
            "endpoint": "http://127.0.0.1:1",
        });
        let destination = svc.create_cloud_destination(server_id, input).await.unwrap();

        let result = svc.upload_backup_to_cloud(server_id, backup.id, destination.id).await;
        assert!(matches!(result, Err(Error::Provider(_))));
        assert_eq!(std::fs::read_dir(&fx.config.temp_path).unwrap().count(), 0);

        let artifacts = svc.list_cloud_artifacts(server_id).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].status, ArtifactStatus::Failed);
        assert_eq!(artifacts[0].remote_key, format!("alpha/{}.tar.gz.enc", backup.id));
        assert!(artifacts[0].metadata.0.provider["error"].is_string());

        write(&fx.live_dir, "state.txt", "drifted");
        let restore = svc.restore_cloud_artifact(server_id, artifacts[0].id).await;
        assert!(matches!(restore, Err(Error::Validation(_))));
        assert_eq!(std::fs::read_to_string(fx.live_dir.join("state.txt")).unwrap(), "drifted");
        assert!(!svc.list_restore_events(server_id).await.unwrap()[0].success);
    }
}

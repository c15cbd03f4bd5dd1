pub mod cloud;
pub mod error;

use std::{future::Future, path::{Path, PathBuf}, time::Instant};

use serde::Serialize;
use tempfile::TempPath;
use tracing::{info, warn};

use crate::{
    archive_svc,
    cloud_svc::ProviderSettings,
    config::Config,
    integrity_svc::{self, VerificationReport},
    repository::{models::*, DataLayer},
    time_provider::TimeProvider,
};
use self::error::*;

pub use cloud::{CloudBackupService, CloudDestinationInput, CloudDestinationPatch};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackupKind {
    /// An operator- or schedule-requested backup, verified after creation
    Regular,
    /// The snapshot of the live directory taken right before a restore.
    /// Never verified, so that a restore cannot recurse into verification
    PreRestore,
}

#[derive(Clone, Debug, Serialize)]
pub struct CreatedBackup {
    pub backup: BackupModel,
    pub verification: Option<VerificationReport>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RestoreOutcome {
    pub pre_restore_backup_id: i64,
    pub verification: VerificationReport,
}

///
/// Local backup and restore of a server's live directory.
///
/// Callers must never run two restores against the same server at once:
/// a restore deletes the live directory before extracting into it
///
pub trait BackupService {
    ///
    /// Archives the server's live directory and records the new backup
    ///
    fn create_backup(&self, server_id: i64, kind: BackupKind) -> impl Future<Output = Result<CreatedBackup>> + Send;
    ///
    /// Gets every backup of the server, newest first
    ///
    fn list_backups(&self, server_id: i64) -> impl Future<Output = Result<Vec<BackupModel>>> + Send;
    ///
    /// Replaces the server's live directory with the contents of a local backup,
    /// after snapshotting the current state. Every attempt is recorded as a
    /// restore event, successful or not
    ///
    fn restore_backup(&self, server_id: i64, backup_id: i64) -> impl Future<Output = Result<RestoreOutcome>> + Send;
    fn list_restore_events(&self, server_id: i64) -> impl Future<Output = Result<Vec<RestoreEventModel>>> + Send;
}

pub struct FileBackupService<'a> {
    data_layer: &'a dyn DataLayer,
    time_provider: &'a dyn TimeProvider,
    config: &'a Config,
}

///
/// What a restore attempt got through before it finished, for the audit record
///
#[derive(Default)]
struct RestoreAttempt {
    backup_id: i64,
    verified: bool,
}

impl<'a> FileBackupService<'a> {
    pub fn new(data_layer: &'a dyn DataLayer, time_provider: &'a dyn TimeProvider, config: &'a Config) -> Self {
        Self { data_layer, time_provider, config }
    }

    fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            mock_storage_path: self.config.mock_storage_path.clone(),
            timeout: self.config.provider_timeout(),
        }
    }

    async fn get_server(&self, server_id: i64) -> Result<ServerModel> {
        self.data_layer.get_server(server_id).await?
            .ok_or_else(|| Error::NotFound(format!("server {}", server_id)))
    }

    async fn get_server_backup(&self, server_id: i64, backup_id: i64) -> Result<BackupModel> {
        self.data_layer.get_backup(backup_id).await?
            .filter(|b| b.server_id == server_id)
            .ok_or_else(|| Error::NotFound(format!("backup {} of server {}", backup_id, server_id)))
    }

    ///
    /// Allocates an empty file under the temp dir that is removed when the
    /// returned path is dropped, whichever way the caller exits
    ///
    async fn scratch_path(&self, prefix: &str, suffix: &str) -> Result<TempPath> {
        tokio::fs::create_dir_all(&self.config.temp_path).await?;
        Ok(tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(&self.config.temp_path)?
            .into_temp_path())
    }

    async fn create_backup_for(&self, server: &ServerModel, kind: BackupKind) -> Result<CreatedBackup> {
        let live_dir = Path::new(&server.working_dir);
        if !tokio::fs::try_exists(live_dir).await? {
            return Err(Error::Filesystem(format!("server directory {} does not exist", live_dir.display())));
        }

        let suffix = match kind {
            BackupKind::Regular => "",
            BackupKind::PreRestore => "-pre-restore",
        };
        let archive_name = format!(
            "{}-{}-{:08x}{}.tar.gz",
            sanitize_name(&server.name), self.time_provider.file_stamp(), rand::random::<u32>(), suffix
        );
        let output_dir = self.config.backups_path.join(server.id.to_string());
        let archive_path = archive_svc::create_archive(live_dir, &output_dir, &archive_name).await?;

        let verification = match kind {
            BackupKind::PreRestore => None,
            BackupKind::Regular => match integrity_svc::verify(&archive_path).await {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(server_id = server.id, archive = %archive_path.display(), error = %e, "new backup failed verification");
                    tokio::fs::remove_file(&archive_path).await?;
                    return Err(e.into());
                }
            },
        };

        let size_bytes = tokio::fs::metadata(&archive_path).await?.len() as i64;
        let backup_id = self.data_layer.create_backup(&NewBackup {
            server_id: server.id,
            file_path: archive_path.to_string_lossy().to_string(),
            size_bytes,
            pre_restore: kind == BackupKind::PreRestore,
            created_at: self.time_provider.naive_utc_now(),
        }).await?;
        let backup = self.data_layer.get_backup(backup_id).await?
            .ok_or_else(|| Error::NotFound(format!("backup {}", backup_id)))?;

        info!(server_id = server.id, backup_id, size_bytes, ?kind, "backup created");
        Ok(CreatedBackup { backup, verification })
    }

    ///
    /// Verifies `archive_path`, snapshots the live directory, then replaces
    /// the live directory with the archive's contents
    ///
    async fn restore_from_archive(
        &self, server: &ServerModel, archive_path: &Path, attempt: &mut RestoreAttempt
    ) -> Result<RestoreOutcome> {
        let verification = integrity_svc::verify(archive_path).await?;
        attempt.verified = true;

        let snapshot = self.create_backup_for(server, BackupKind::PreRestore).await?;

        let live_dir = PathBuf::from(&server.working_dir);
        self.clear_live_dir(server, &live_dir).await?;
        archive_svc::extract_archive(archive_path, &live_dir).await?;

        Ok(RestoreOutcome { pre_restore_backup_id: snapshot.backup.id, verification })
    }

    ///
    /// Deletes everything directly under the live directory except the
    /// server's runtime executable
    ///
    async fn clear_live_dir(&self, server: &ServerModel, live_dir: &Path) -> Result<()> {
        let keep = server.runtime_executable.as_deref()
            .or(self.config.runtime_executable.as_deref());

        let mut entries = tokio::fs::read_dir(live_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if keep.is_some_and(|k| entry.file_name() == k) {
                continue;
            }
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                tokio::fs::remove_dir_all(entry.path()).await?;
            } else {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }

    async fn restore_local(&self, server_id: i64, backup_id: i64, attempt: &mut RestoreAttempt) -> Result<RestoreOutcome> {
        let server = self.get_server(server_id).await?;
        let backup = self.get_server_backup(server_id, backup_id).await?;

        let archive_path = PathBuf::from(&backup.file_path);
        if !tokio::fs::try_exists(&archive_path).await? {
            return Err(Error::Filesystem(format!("backup file {} is missing", archive_path.display())));
        }

        let outcome = self.restore_from_archive(&server, &archive_path, attempt).await?;
        self.data_layer.mark_backup_restored(backup.id, self.time_provider.naive_utc_now()).await?;
        Ok(outcome)
    }

    ///
    /// Appends the audit record for a finished restore attempt. A failure to
    /// write the record is logged, never returned over the restore's own result
    ///
    async fn record_restore(
        &self, server_id: i64, source: RestoreSource, attempt: &RestoreAttempt,
        result: &Result<RestoreOutcome>, started: Instant
    ) {
        let detail = match result {
            Ok(outcome) => format!(
                "restored {} entries; pre-restore backup {}",
                outcome.verification.entry_count, outcome.pre_restore_backup_id
            ),
            Err(e) => e.to_string(),
        };
        let event = NewRestoreEvent {
            server_id,
            backup_id: attempt.backup_id,
            source,
            success: result.is_ok(),
            verified: attempt.verified,
            detail: Some(detail),
            duration_ms: started.elapsed().as_millis() as i64,
            created_at: self.time_provider.naive_utc_now(),
        };
        if let Err(e) = self.data_layer.create_restore_event(&event).await {
            warn!(server_id, error = %e, "could not record restore event");
        }

        match result {
            Ok(_) => info!(server_id, backup_id = attempt.backup_id, ?source, "restore complete"),
            Err(e) => warn!(server_id, backup_id = attempt.backup_id, ?source, error = %e, "restore failed"),
        }
    }
}

impl<'a> BackupService for FileBackupService<'a> {
    async fn create_backup(&self, server_id: i64, kind: BackupKind) -> Result<CreatedBackup> {
        let server = self.get_server(server_id).await?;
        self.create_backup_for(&server, kind).await
    }

    async fn list_backups(&self, server_id: i64) -> Result<Vec<BackupModel>> {
        Ok(self.data_layer.list_backups(server_id).await?)
    }

    async fn restore_backup(&self, server_id: i64, backup_id: i64) -> Result<RestoreOutcome> {
        let started = Instant::now();
        let mut attempt = RestoreAttempt { backup_id, ..Default::default() };

        let result = self.restore_local(server_id, backup_id, &mut attempt).await;
        self.record_restore(server_id, RestoreSource::Local, &attempt, &result, started).await;
        result
    }

    async fn list_restore_events(&self, server_id: i64) -> Result<Vec<RestoreEventModel>> {
        Ok(self.data_layer.list_restore_events(server_id).await?)
    }
}

///
/// Reduces a server name to characters safe in file names and object keys
///
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name.trim().chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '-' })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '-' || c == '.');
    if cleaned.is_empty() { "server".to_string() } else { cleaned.to_string() }
}

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{types::Json, SqlitePool};

#[cfg(test)]
use mockall::automock;

use super::models::*;
use crate::data_layer_error::*;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DataLayer : Send + Sync {
    ///
    /// Retrieves the server with the given `server_id`, if it exists
    ///
    async fn get_server(&self, server_id: i64) -> Result<Option<ServerModel>>;
    ///
    /// Registers a server whose live directory is found at `working_dir`
    ///
    async fn create_server(&self, name: &str, working_dir: &str, runtime_executable: Option<String>) -> Result<i64>;

    async fn create_backup(&self, backup: &NewBackup) -> Result<i64>;
    async fn get_backup(&self, backup_id: i64) -> Result<Option<BackupModel>>;
    ///
    /// Gets every backup of the server with the given `server_id`, newest first
    ///
    async fn list_backups(&self, server_id: i64) -> Result<Vec<BackupModel>>;
    ///
    /// Stamps the backup's "restored at" timestamp. The only mutation a backup ever sees
    ///
    async fn mark_backup_restored(&self, backup_id: i64, ts: NaiveDateTime) -> Result<()>;

    async fn create_destination(&self, destination: &NewCloudDestination) -> Result<i64>;
    async fn get_destination(&self, destination_id: i64) -> Result<Option<CloudDestinationModel>>;
    async fn list_destinations(&self, server_id: i64) -> Result<Vec<CloudDestinationModel>>;
    ///
    /// Persists name, config, passphrase and enabled flag of the given destination
    ///
    async fn update_destination(&self, destination: &CloudDestinationModel) -> Result<()>;
    async fn delete_destination(&self, destination_id: i64) -> Result<()>;

    async fn create_artifact(&self, artifact: &NewCloudArtifact) -> Result<i64>;
    async fn get_artifact(&self, artifact_id: i64) -> Result<Option<CloudArtifactModel>>;
    async fn list_artifacts(&self, server_id: i64) -> Result<Vec<CloudArtifactModel>>;

    ///
    /// Appends an immutable restore audit record
    ///
    async fn create_restore_event(&self, event: &NewRestoreEvent) -> Result<i64>;
    async fn list_restore_events(&self, server_id: i64) -> Result<Vec<RestoreEventModel>>;
}

pub struct DbDataLayer<'a> {
    db: &'a SqlitePool,
}

impl<'a> DbDataLayer<'a> {
    pub fn new(db: &'a SqlitePool) -> Self {
        Self { db }
    }

    ///
    /// Applies the embedded schema migrations
    ///
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!().run(self.db).await?;
        Ok(())
    }
}

#[async_trait]
impl<'a> DataLayer for DbDataLayer<'a> {
    async fn get_server(&self, server_id: i64) -> Result<Option<ServerModel>> {
        Ok(sqlx::query_as::<_, ServerModel>(
            "SELECT id, name, working_dir, runtime_executable FROM servers WHERE id = ?"
        )
            .bind(server_id)
            .fetch_optional(self.db).await?)
    }
    async fn create_server(&self, name: &str, working_dir: &str, runtime_executable: Option<String>) -> Result<i64> {
        Ok(sqlx::query("INSERT INTO servers (name, working_dir, runtime_executable) VALUES (?, ?, ?)")
            .bind(name)
            .bind(working_dir)
            .bind(runtime_executable)
            .execute(self.db).await?.last_insert_rowid())
    }

    async fn create_backup(&self, backup: &NewBackup) -> Result<i64> {
        Ok(sqlx::query(
            "INSERT INTO backups (server_id, file_path, size_bytes, pre_restore, created_at) VALUES (?, ?, ?, ?, ?)"
        )
            .bind(backup.server_id)
            .bind(&backup.file_path)
            .bind(backup.size_bytes)
            .bind(backup.pre_restore)
            .bind(backup.created_at)
            .execute(self.db).await?.last_insert_rowid())
    }
    async fn get_backup(&self, backup_id: i64) -> Result<Option<BackupModel>> {
        Ok(sqlx::query_as::<_, BackupModel>("
            SELECT id, server_id, file_path, size_bytes, pre_restore, created_at, restored_at
            FROM backups WHERE id = ?
            ")
            .bind(backup_id)
            .fetch_optional(self.db).await?)
    }
    async fn list_backups(&self, server_id: i64) -> Result<Vec<BackupModel>> {
        Ok(sqlx::query_as::<_, BackupModel>("
            SELECT id, server_id, file_path, size_bytes, pre_restore, created_at, restored_at
            FROM backups WHERE server_id = ?
            ORDER BY created_at DESC, id DESC
            ")
            .bind(server_id)
            .fetch_all(self.db).await?)
    }
    async fn mark_backup_restored(&self, backup_id: i64, ts: NaiveDateTime) -> Result<()> {
        sqlx::query("UPDATE backups SET restored_at = ? WHERE id = ?")
            .bind(ts)
            .bind(backup_id)
            .execute(self.db).await?;
        Ok(())
    }

    async fn create_destination(&self, destination: &NewCloudDestination) -> Result<i64> {
        Ok(sqlx::query("
            INSERT INTO cloud_destinations (server_id, provider, name, config, passphrase, enabled, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ")
            .bind(destination.server_id)
            .bind(destination.provider)
            .bind(&destination.name)
            .bind(Json(&destination.config))
            .bind(&destination.passphrase)
            .bind(destination.enabled)
            .bind(destination.created_at)
            .bind(destination.created_at)
            .execute(self.db).await?.last_insert_rowid())
    }
    async fn get_destination(&self, destination_id: i64) -> Result<Option<CloudDestinationModel>> {
        Ok(sqlx::query_as::<_, CloudDestinationModel>("
            SELECT id, server_id, provider, name, config, passphrase, enabled, created_at, updated_at
            FROM cloud_destinations WHERE id = ?
            ")
            .bind(destination_id)
            .fetch_optional(self.db).await?)
    }
    async fn list_destinations(&self, server_id: i64) -> Result<Vec<CloudDestinationModel>> {
        Ok(sqlx::query_as::<_, CloudDestinationModel>("
            SELECT id, server_id, provider, name, config, passphrase, enabled, created_at, updated_at
            FROM cloud_destinations WHERE server_id = ?
            ORDER BY id
            ")
            .bind(server_id)
            .fetch_all(self.db).await?)
    }
    async fn update_destination(&self, destination: &CloudDestinationModel) -> Result<()> {
        sqlx::query("
            UPDATE cloud_destinations
            SET name = ?, config = ?, passphrase = ?, enabled = ?, updated_at = ?
            WHERE id = ?
            ")
            .bind(&destination.name)
            .bind(&destination.config)
            .bind(&destination.passphrase)
            .bind(destination.enabled)
            .bind(destination.updated_at)
            .bind(destination.id)
            .execute(self.db).await?;
        Ok(())
    }
    async fn delete_destination(&self, destination_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM cloud_destinations WHERE id = ?")
            .bind(destination_id)
            .execute(self.db).await?;
        Ok(())
    }

    async fn create_artifact(&self, artifact: &NewCloudArtifact) -> Result<i64> {
        Ok(sqlx::query("
            INSERT INTO cloud_artifacts
                (backup_id, server_id, destination_id, remote_key, checksum, encrypted, size_bytes, metadata, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ")
            .bind(artifact.backup_id)
            .bind(artifact.server_id)
            .bind(artifact.destination_id)
            .bind(&artifact.remote_key)
            .bind(&artifact.checksum)
            .bind(true)
            .bind(artifact.size_bytes)
            .bind(Json(&artifact.metadata))
            .bind(artifact.status)
            .bind(artifact.created_at)
            .execute(self.db).await?.last_insert_rowid())
    }
    async fn get_artifact(&self, artifact_id: i64) -> Result<Option<CloudArtifactModel>> {
        Ok(sqlx::query_as::<_, CloudArtifactModel>("
            SELECT id, backup_id, server_id, destination_id, remote_key, checksum, encrypted,
                   size_bytes, metadata, status, created_at
            FROM cloud_artifacts WHERE id = ?
            ")
            .bind(artifact_id)
            .fetch_optional(self.db).await?)
    }
    async fn list_artifacts(&self, server_id: i64) -> Result<Vec<CloudArtifactModel>> {
        Ok(sqlx::query_as::<_, CloudArtifactModel>("
            SELECT id, backup_id, server_id, destination_id, remote_key, checksum, encrypted,
                   size_bytes, metadata, status, created_at
            FROM cloud_artifacts WHERE server_id = ?
            ORDER BY created_at DESC, id DESC
            ")
            .bind(server_id)
            .fetch_all(self.db).await?)
    }

    async fn create_restore_event(&self, event: &NewRestoreEvent) -> Result<i64> {
        Ok(sqlx::query("
            INSERT INTO restore_events (server_id, backup_id, source, success, verified, detail, duration_ms, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ")
            .bind(event.server_id)
            .bind(event.backup_id)
            .bind(event.source)
            .bind(event.success)
            .bind(event.verified)
            .bind(&event.detail)
            .bind(event.duration_ms)
            .bind(event.created_at)
            .execute(self.db).await?.last_insert_rowid())
    }
    async fn list_restore_events(&self, server_id: i64) -> Result<Vec<RestoreEventModel>> {
        Ok(sqlx::query_as::<_, RestoreEventModel>("
            SELECT id, server_id, backup_id, source, success, verified, detail, duration_ms, created_at
            FROM restore_events WHERE server_id = ?
            ORDER BY id
            ")
            .bind(server_id)
            .fetch_all(self.db).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_backup_restored_at_is_stamped() {
        let db = memory_pool().await;
        let data_layer = DbDataLayer::new(&db);
        data_layer.migrate().await.unwrap();

        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap().naive_utc();
        let server_id = data_layer.create_server("alpha", "/srv/alpha", None).await.unwrap();
        let backup_id = data_layer.create_backup(&NewBackup {
            server_id, file_path: "/backups/a.tar.gz".to_string(), size_bytes: 42, pre_restore: false, created_at: ts
        }).await.unwrap();

        assert!(data_layer.get_backup(backup_id).await.unwrap().unwrap().restored_at.is_none());
        data_layer.mark_backup_restored(backup_id, ts).await.unwrap();
        assert_eq!(data_layer.get_backup(backup_id).await.unwrap().unwrap().restored_at, Some(ts));
    }

    #[tokio::test]
    async fn test_destination_round_trips_provider_and_config() {
        let db = memory_pool().await;
        let data_layer = DbDataLayer::new(&db);
        data_layer.migrate().await.unwrap();

        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap().naive_utc();
        let config = serde_json::json!({ "accessToken": "t", "folderId": "f" });
        let id = data_layer.create_destination(&NewCloudDestination {
            server_id: 7,
            provider: ProviderKind::GoogleDrive,
            name: "drive".to_string(),
            config: config.clone(),
            passphrase: "secret".to_string(),
            enabled: true,
            created_at: ts,
        }).await.unwrap();

        let mut dest = data_layer.get_destination(id).await.unwrap().unwrap();
        assert_eq!(dest.provider, ProviderKind::GoogleDrive);
        assert_eq!(dest.config.0, config);

        dest.enabled = false;
        data_layer.update_destination(&dest).await.unwrap();
        assert!(!data_layer.list_destinations(7).await.unwrap()[0].enabled);

        data_layer.delete_destination(id).await.unwrap();
        assert!(data_layer.get_destination(id).await.unwrap().is_none());
    }
}

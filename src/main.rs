use std::error::Error;

use clap::{Parser, Subcommand};
use serde::Serialize;
use server_backup::{
    backup_service::{
        BackupKind, BackupService, CloudBackupService, CloudDestinationInput, CloudDestinationPatch, FileBackupService,
    },
    config::Config,
    repository::{models::ProviderKind, DataLayer, DbDataLayer},
    time_provider::CoreTimeProvider,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "server-backup", about = "Encrypted backup and restore of game server directories")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a server and its live directory
    AddServer {
        name: String,
        working_dir: String,
        #[arg(long)]
        runtime_executable: Option<String>,
    },
    /// Archive a server's live directory
    Backup { server_id: i64 },
    ListBackups { server_id: i64 },
    /// Replace a server's live directory with a local backup
    Restore { server_id: i64, backup_id: i64 },
    ListRestoreEvents { server_id: i64 },
    AddDestination {
        server_id: i64,
        /// s3 or google_drive
        provider: ProviderKind,
        name: String,
        /// Provider config as a JSON object
        #[arg(long)]
        config: String,
        #[arg(long, env = "SERVER_BACKUP_PASSPHRASE")]
        passphrase: String,
        #[arg(long)]
        disabled: bool,
    },
    UpdateDestination {
        server_id: i64,
        destination_id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        config: Option<String>,
        #[arg(long)]
        passphrase: Option<String>,
        #[arg(long)]
        enabled: Option<bool>,
    },
    DeleteDestination { server_id: i64, destination_id: i64 },
    ListDestinations { server_id: i64 },
    /// Encrypt a backup and upload it to a destination
    Upload { server_id: i64, backup_id: i64, destination_id: i64 },
    ListArtifacts { server_id: i64 },
    /// Download, decrypt and restore a cloud artifact
    RestoreCloud { server_id: i64, artifact_id: i64 },
}

fn print<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "server_backup=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    let connect_options: SqliteConnectOptions = config.database_url.parse()?;
    let db = SqlitePoolOptions::new()
        .connect_with(connect_options.create_if_missing(true))
        .await?;
    let data_layer = DbDataLayer::new(&db);
    data_layer.migrate().await?;

    let time_provider = CoreTimeProvider::new();
    let svc = FileBackupService::new(&data_layer, &time_provider, &config);

    match cli.command {
        Command::AddServer { name, working_dir, runtime_executable } => {
            let id = data_layer.create_server(&name, &working_dir, runtime_executable).await?;
            print(&data_layer.get_server(id).await?)?;
        }
        Command::Backup { server_id } => print(&svc.create_backup(server_id, BackupKind::Regular).await?)?,
        Command::ListBackups { server_id } => print(&svc.list_backups(server_id).await?)?,
        Command::Restore { server_id, backup_id } => print(&svc.restore_backup(server_id, backup_id).await?)?,
        Command::ListRestoreEvents { server_id } => print(&svc.list_restore_events(server_id).await?)?,
        Command::AddDestination { server_id, provider, name, config, passphrase, disabled } => {
            let input = CloudDestinationInput {
                provider,
                name,
                config: serde_json::from_str(&config)?,
                passphrase,
                enabled: !disabled,
            };
            print(&svc.create_cloud_destination(server_id, input).await?)?;
        }
        Command::UpdateDestination { server_id, destination_id, name, config, passphrase, enabled } => {
            let patch = CloudDestinationPatch {
                name,
                config: config.map(|c| serde_json::from_str(&c)).transpose()?,
                passphrase,
                enabled,
            };
            print(&svc.update_cloud_destination(server_id, destination_id, patch).await?)?;
        }
        Command::DeleteDestination { server_id, destination_id } => {
            svc.delete_cloud_destination(server_id, destination_id).await?;
        }
        Command::ListDestinations { server_id } => print(&svc.list_cloud_destinations(server_id).await?)?,
        Command::Upload { server_id, backup_id, destination_id } => {
            print(&svc.upload_backup_to_cloud(server_id, backup_id, destination_id).await?)?;
        }
        Command::ListArtifacts { server_id } => print(&svc.list_cloud_artifacts(server_id).await?)?,
        Command::RestoreCloud { server_id, artifact_id } => {
            print(&svc.restore_cloud_artifact(server_id, artifact_id).await?)?;
        }
    }

    Ok(())
}

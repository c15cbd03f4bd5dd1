use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

const CONFIG_PATH_VAR: &str = "SERVER_BACKUP_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.json";

#[derive(Debug)]
pub enum ConfigError {
    IOError(std::io::Error),
    ParseError(serde_json::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IOError(e) => write!(f, "could not read config: {}", e),
            ConfigError::ParseError(e) => write!(f, "could not parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::IOError(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        ConfigError::ParseError(value)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory every archive produced by the Archiver is written to
    pub backups_path: PathBuf,
    /// Directory for scoped temporary files (ciphertext, decrypted archives)
    pub temp_path: PathBuf,
    /// Root used by dry-run providers when a destination sets no `mockDir`
    pub mock_storage_path: PathBuf,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Fallback runtime executable name preserved during a restore wipe
    #[serde(default)]
    pub runtime_executable: Option<String>,
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,
}

fn default_database_url() -> String {
    "sqlite://server_backup.db".to_string()
}

fn default_provider_timeout() -> u64 {
    300
}

impl Config {
    ///
    /// Loads the config from `SERVER_BACKUP_CONFIG` (or `config.json`),
    /// letting `DATABASE_URL` override the configured database
    ///
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config: Config = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }
        Ok(config)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

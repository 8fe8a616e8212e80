//! Store configuration via `gitstore.toml`
//!
//! Everything that can be expressed as plain data lives here. Runtime
//! collaborators (backend override, power monitor, notifier, legacy model
//! registry) are passed through [`crate::OpenOptions`] instead.

use gitstore_core::{crypto, Error, Result};
use gitstore_durability::{BackendConfig, BackendKind, User};
use gitstore_storage::Layout;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Conventional config file name
pub const CONFIG_FILE_NAME: &str = "gitstore.toml";

fn default_namespace() -> String {
    "gitdb".to_string()
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_sync_interval() -> u64 {
    5
}

fn default_min_power() -> u8 {
    20
}

/// Store configuration
///
/// # Example
///
/// ```toml
/// db_path = "/var/lib/app/db"
/// online_remote = "git@example.com:team/db.git"
/// sync_interval_secs = 5
///
/// [user]
/// name = "app"
/// email = "app@example.com"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Store root; holds `data/` and the internal directory
    pub db_path: PathBuf,
    /// Internal directory name, stored as `.<namespace>`
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Remote to sync with; syncing is off when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online_remote: Option<String>,
    /// Remote branch
    #[serde(default = "default_branch")]
    pub remote_branch: String,
    /// Private key handed to ssh for remote access
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<PathBuf>,
    /// AES key (16, 24 or 32 bytes) for models that ask for encryption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
    /// Seconds between background syncs
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    /// Version-control backend
    #[serde(default)]
    pub backend: BackendKind,
    /// Minimum battery percentage required to sync
    #[serde(default = "default_min_power")]
    pub min_power_percent: u8,
    /// Commit author
    #[serde(default)]
    pub user: User,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::new(),
            namespace: default_namespace(),
            online_remote: None,
            remote_branch: default_branch(),
            ssh_key: None,
            encryption_key: None,
            sync_interval_secs: default_sync_interval(),
            backend: BackendKind::default(),
            min_power_percent: default_min_power(),
            user: User::default(),
        }
    }
}

impl Config {
    /// Defaults rooted at `db_path`
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    /// Check values that serde cannot.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an empty path or namespace, a zero sync interval,
    /// or an encryption key of the wrong length.
    pub fn validate(&self) -> Result<()> {
        if self.db_path.as_os_str().is_empty() {
            return Err(Error::invalid_input("db_path must be set"));
        }
        if self.namespace.is_empty() || self.namespace.contains(&['/', '\\'][..]) {
            return Err(Error::invalid_input(format!(
                "invalid namespace '{}'",
                self.namespace
            )));
        }
        if self.sync_interval_secs == 0 {
            return Err(Error::invalid_input("sync_interval_secs must be greater than 0"));
        }
        if let Some(key) = &self.encryption_key {
            crypto::validate_key(key.as_bytes())
                .map_err(|e| Error::invalid_input(format!("encryption_key: {e}")))?;
        }
        Ok(())
    }

    /// Encryption key bytes
    pub fn key(&self) -> Option<&[u8]> {
        self.encryption_key.as_deref().map(str::as_bytes)
    }

    /// Sync interval
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Path layout of this store
    pub fn layout(&self) -> Layout {
        Layout::new(&self.db_path, &self.namespace)
    }

    /// Backend settings
    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            data_dir: self.layout().data_dir(),
            remote: self.online_remote.clone(),
            branch: self.remote_branch.clone(),
            ssh_key: self.ssh_key.clone(),
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# gitstore configuration
#
# Store root. Records live under <db_path>/data, bookkeeping under <db_path>/.gitdb
db_path = "./db"

# Internal directory name (stored as .<namespace>)
namespace = "gitdb"

# Remote to sync with. Syncing is disabled when unset.
# online_remote = "git@example.com:team/db.git"
remote_branch = "master"

# Private key for remote access
# ssh_key = "/home/app/.ssh/id_rsa"

# 16, 24 or 32 byte key for models that request encryption
# encryption_key = "b61ba8270ccc3c1d42b4417e7bd60b71"

# Seconds between background syncs
sync_interval_secs = 5

# "git" or "local"
backend = "git"

# Do not sync below this battery percentage
min_power_percent = 20

[user]
name = "gitstore"
email = "gitstore@localhost"
"#
    }

    /// Read, parse and validate config from a file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_input(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            Error::invalid_input(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

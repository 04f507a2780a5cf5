//! Configuration for the backup orchestrator.
//!
//! Loaded from a TOML file; AWS credentials may also come from the environment
//! (or a `.env` file), which overrides the file.

use crate::utils::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cluster: ClusterConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub cassandra: CassandraConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub restore: RestoreConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cassandra nodes to back up
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Maximum number of nodes driven at the same time
    #[serde(default = "default_connection_pool_size")]
    pub connection_pool_size: usize,

    /// Prefix node commands with `sudo`
    #[serde(default)]
    pub use_sudo: bool,

    /// Run node commands on this machine instead of over SSH
    #[serde(default)]
    pub use_local: bool,

    /// `nice` level applied to local commands
    #[serde(default)]
    pub nice: Option<i32>,

    #[serde(default)]
    pub ssh: SshConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_ssh_user")]
    pub user: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Private key file; when unset the SSH agent is tried, then the password
    #[serde(default)]
    pub key_file: Option<PathBuf>,

    /// Password for authentication and `sudo -S`
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Destination bucket
    pub bucket: String,

    /// Prefix under which every backup is stored
    #[serde(default)]
    pub base_path: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Custom S3 endpoint (MinIO, Ceph, ...)
    #[serde(default)]
    pub connection_host: Option<String>,

    /// Ask the agent for server-side encryption
    #[serde(default)]
    pub ssenc: bool,

    #[serde(default)]
    pub aws_access_key_id: Option<String>,

    #[serde(default)]
    pub aws_secret_access_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CassandraConfig {
    /// Directory holding `cassandra.yaml` on the nodes
    #[serde(default = "default_conf_path")]
    pub conf_path: String,

    /// Directory holding `nodetool` and `cqlsh` on the nodes
    #[serde(default = "default_tools_bin_dir")]
    pub tools_bin_dir: String,

    #[serde(default)]
    pub cqlsh_user: Option<String>,

    #[serde(default)]
    pub cqlsh_password: Option<String>,

    /// Dump the schema next to every backup
    #[serde(default)]
    pub backup_schema: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Agent read buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: u64,

    /// Parallel transfers per node
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Upload rate limit in KB/s, 0 for none
    #[serde(default)]
    pub rate_limit: u64,

    #[serde(default)]
    pub reduced_redundancy: bool,

    #[serde(default)]
    pub quiet: bool,

    /// Comma separated tables the agent skips
    #[serde(default)]
    pub exclude_tables: String,

    /// Where the agent writes the upload manifest on each node
    #[serde(default = "default_manifest_path")]
    pub manifest_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    #[serde(default = "default_restore_dir")]
    pub restore_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_connection_pool_size() -> usize {
    12
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_conf_path() -> String {
    "/etc/cassandra".to_string()
}

fn default_tools_bin_dir() -> String {
    "/usr/bin".to_string()
}

fn default_buffer_size() -> u64 {
    64 * 1024 * 1024 // 64MB
}

fn default_concurrency() -> usize {
    4
}

fn default_manifest_path() -> String {
    "/tmp/backupmanifest".to_string()
}

fn default_restore_dir() -> String {
    "/tmp/restore_cassandra".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            connection_pool_size: default_connection_pool_size(),
            use_sudo: false,
            use_local: false,
            nice: None,
            ssh: SshConfig::default(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            port: default_ssh_port(),
            key_file: None,
            password: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            base_path: String::new(),
            region: default_region(),
            connection_host: None,
            ssenc: false,
            aws_access_key_id: None,
            aws_secret_access_key: None,
        }
    }
}

impl Default for CassandraConfig {
    fn default() -> Self {
        Self {
            conf_path: default_conf_path(),
            tools_bin_dir: default_tools_bin_dir(),
            cqlsh_user: None,
            cqlsh_password: None,
            backup_schema: false,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            concurrency: default_concurrency(),
            rate_limit: 0,
            reduced_redundancy: false,
            quiet: false,
            exclude_tables: String::new(),
            manifest_path: default_manifest_path(),
        }
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            restore_dir: default_restore_dir(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl StorageConfig {
    /// Key and secret, only when both are set.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.aws_access_key_id, &self.aws_secret_access_key) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Some((key.as_str(), secret.as_str()))
            }
            _ => None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` from the
    /// environment, loading `.env` first when present.
    pub fn apply_env(&mut self) {
        let _ = dotenvy::dotenv();
        if let Ok(key) = std::env::var("AWS_ACCESS_KEY_ID") {
            self.storage.aws_access_key_id = Some(key);
        }
        if let Ok(secret) = std::env::var("AWS_SECRET_ACCESS_KEY") {
            self.storage.aws_secret_access_key = Some(secret);
        }
    }

    /// Check required settings and fill in the local host when running locally.
    pub fn validate(&mut self) -> Result<()> {
        if self.storage.bucket.is_empty() {
            return Err(BackupError::Config("storage.bucket is required".to_string()));
        }
        if self.cluster.connection_pool_size == 0 {
            return Err(BackupError::Config(
                "cluster.connection_pool_size must be at least 1".to_string(),
            ));
        }
        if self.cluster.hosts.is_empty() {
            if !self.cluster.use_local {
                return Err(BackupError::Config(
                    "cluster.hosts is empty and use_local is not set".to_string(),
                ));
            }
            let local = hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string());
            self.cluster.hosts.push(local);
        }
        Ok(())
    }
}

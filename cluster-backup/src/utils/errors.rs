//! Error types for backup orchestration.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid manifest: {0}")]
    ManifestParse(String),

    #[error("Object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("Command on {host} exited with status {status}: `{command}`: {stderr}")]
    RemoteCommand {
        host: String,
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("No valid backup found under {bucket}/{base_path}")]
    EmptyCatalog { bucket: String, base_path: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("SSH error on {host}: {message}")]
    Ssh { host: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    ConfigFile(#[from] toml::de::Error),

    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl BackupError {
    /// Whether this error means a stored object was missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackupError::ObjectNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

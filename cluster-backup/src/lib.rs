//! Cluster Backup Library
//!
//! Full and incremental backups of a Cassandra cluster to S3, driven from a
//! single orchestrator host through a per-node backup agent.

pub mod config;
pub mod models;
pub mod remote;
pub mod services;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::BackupError;
pub use utils::Result;

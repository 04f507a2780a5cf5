//! Restore of one keyspace from a stored backup.

use crate::config::Config;
use crate::models::BackupDescriptor;
use crate::remote::command::{AwsCredentials, FetchRequest};
use crate::remote::{ExecTarget, NodeCommand, RemoteExecutor, Tools};
use crate::storage::s3::s3_connection_host;
use crate::utils::Result;
use std::sync::Arc;
use tracing::info;

pub struct RestoreOrchestrator {
    executor: Arc<dyn RemoteExecutor>,
    backup: BackupDescriptor,
    tools: Tools,
    tools_bin_dir: String,
    restore_dir: String,
    s3_host: String,
    credentials: Option<AwsCredentials>,
}

impl RestoreOrchestrator {
    pub fn new(config: &Config, executor: Arc<dyn RemoteExecutor>, backup: BackupDescriptor) -> Self {
        let s3_host = config
            .storage
            .connection_host
            .clone()
            .unwrap_or_else(|| s3_connection_host(&config.storage.region));
        let credentials = config.storage.credentials().map(|(key, secret)| AwsCredentials {
            access_key_id: key.to_string(),
            secret_access_key: secret.to_string(),
        });

        Self {
            executor,
            backup,
            tools: Tools::new(&config.cassandra.tools_bin_dir),
            tools_bin_dir: config.cassandra.tools_bin_dir.clone(),
            restore_dir: config.restore.restore_dir.clone(),
            s3_host,
            credentials,
        }
    }

    pub fn backup(&self) -> &BackupDescriptor {
        &self.backup
    }

    /// The agent command that fetches `keyspace` onto `target`.
    pub fn fetch_command(&self, target: &ExecTarget, keyspace: &str) -> NodeCommand {
        NodeCommand::Fetch(FetchRequest {
            keyspace: keyspace.to_string(),
            snapshot_path: self.backup.effective_path(),
            credentials: self.credentials.clone(),
            s3_host: self.s3_host.clone(),
            bucket: self.backup.bucket().to_string(),
            host: target.host.clone(),
            tools_bin_dir: self.tools_bin_dir.clone(),
            restore_dir: self.restore_dir.clone(),
        })
    }

    /// Fetch and restore `keyspace` on one node. Not retried.
    pub async fn restore(&self, target: &ExecTarget, keyspace: &str) -> Result<()> {
        info!(
            backup = %self.backup,
            keyspace,
            host = %target,
            "Restoring keyspace"
        );
        let command = self.fetch_command(target, keyspace).render(&self.tools);
        self.executor.run(target, &command).await?;
        Ok(())
    }
}

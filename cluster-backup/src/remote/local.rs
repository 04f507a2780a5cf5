//! Runs node commands on the machine the orchestrator runs on.
//!
//! Used when the orchestrator is deployed on every node (for example from
//! cron) instead of driving the cluster over SSH.

use super::{CommandLine, ExecTarget, RemoteExecutor};
use crate::utils::{BackupError, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

pub struct LocalExecutor {
    use_sudo: bool,
    nice: Option<i32>,
}

impl LocalExecutor {
    pub fn new(use_sudo: bool, nice: Option<i32>) -> Self {
        Self { use_sudo, nice }
    }

    /// Apply the `nice` and `sudo` prefixes.
    fn shell_line(&self, line: &str) -> String {
        let mut prefixed = String::new();
        if let Some(level) = self.nice {
            prefixed.push_str(&format!("nice -n {level} "));
        }
        if self.use_sudo {
            prefixed.push_str("sudo ");
        }
        prefixed.push_str(line);
        prefixed
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    async fn run(&self, target: &ExecTarget, command: &CommandLine) -> Result<String> {
        let line = self.shell_line(command.as_str());
        debug!(host = %target, label = command.label(), "Running local command");

        let output = Command::new("sh").arg("-c").arg(&line).output().await?;
        if !output.status.success() {
            return Err(BackupError::RemoteCommand {
                host: target.host.clone(),
                command: command.redacted().to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

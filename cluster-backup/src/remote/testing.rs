//! Recording executor for orchestrator tests.

use super::{CommandLine, ExecTarget, RemoteExecutor};
use crate::utils::{BackupError, Result};
use async_trait::async_trait;
use std::sync::Mutex;

/// Records every command per host. Commands containing a `fail_on` pattern
/// exit with status 1; `respond` patterns return canned stdout.
#[derive(Default)]
pub(crate) struct RecordingExecutor {
    calls: Mutex<Vec<(String, String)>>,
    failures: Vec<String>,
    responses: Vec<(String, String)>,
}

impl RecordingExecutor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_on(mut self, pattern: &str) -> Self {
        self.failures.push(pattern.to_string());
        self
    }

    pub(crate) fn respond(mut self, pattern: &str, output: &str) -> Self {
        self.responses.push((pattern.to_string(), output.to_string()));
        self
    }

    /// Every `(host, command)` pair in execution order.
    pub(crate) fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn commands_for(&self, host: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(h, _)| h == host)
            .map(|(_, c)| c)
            .collect()
    }

    /// Number of recorded commands containing `pattern`.
    pub(crate) fn count(&self, pattern: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(_, c)| c.contains(pattern))
            .count()
    }
}

#[async_trait]
impl RemoteExecutor for RecordingExecutor {
    async fn run(&self, target: &ExecTarget, command: &CommandLine) -> Result<String> {
        let line = command.as_str().to_string();
        self.calls
            .lock()
            .unwrap()
            .push((target.host.clone(), line.clone()));

        if self.failures.iter().any(|p| line.contains(p.as_str())) {
            return Err(BackupError::RemoteCommand {
                host: target.host.clone(),
                command: command.redacted().to_string(),
                status: 1,
                stderr: "simulated failure".to_string(),
            });
        }

        Ok(self
            .responses
            .iter()
            .find(|(p, _)| line.contains(p.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default())
    }
}

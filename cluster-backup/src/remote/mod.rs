//! Remote command execution on cluster nodes.
//!
//! A [`RemoteExecutor`] runs one command line on one [`ExecTarget`]. Cluster
//! wide phases go through [`fan_out`], which drives every host concurrently,
//! bounded by the connection pool size, and waits for all of them.

pub mod command;
pub mod local;
pub mod ssh;

#[cfg(test)]
pub(crate) mod testing;

use crate::utils::{BackupError, Result};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

pub use command::{CommandLine, NodeCommand, Tools};
pub use local::LocalExecutor;
pub use ssh::SshExecutor;

/// The node a command runs against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecTarget {
    pub host: String,
}

impl ExecTarget {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl fmt::Display for ExecTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host)
    }
}

/// Transport for node commands.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run one command on `target` and return its stdout. A non-zero exit is
    /// reported as `BackupError::RemoteCommand`.
    async fn run(&self, target: &ExecTarget, command: &CommandLine) -> Result<String>;
}

/// Result of one host's share of a phase.
#[derive(Debug)]
pub struct HostOutcome {
    pub host: String,
    pub result: Result<()>,
}

/// Run the commands built by `build` on every host, at most `parallelism`
/// hosts at a time. A host's commands run in order and stop at its first
/// failure; other hosts are never cancelled.
pub async fn run_on_hosts<F>(
    executor: Arc<dyn RemoteExecutor>,
    hosts: &[String],
    parallelism: usize,
    build: F,
) -> Vec<HostOutcome>
where
    F: Fn(&ExecTarget) -> Vec<CommandLine>,
{
    let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
    let mut handles = Vec::with_capacity(hosts.len());

    for host in hosts {
        let target = ExecTarget::new(host.clone());
        let commands = build(&target);
        let executor = Arc::clone(&executor);
        let semaphore = Arc::clone(&semaphore);

        handles.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| BackupError::Config(format!("connection pool closed: {e}")))?;
            for command in &commands {
                debug!(host = %target, command = %command, "Running node command");
                executor.run(&target, command).await?;
            }
            Ok(())
        }));
    }

    join_all(handles)
        .await
        .into_iter()
        .zip(hosts)
        .map(|(joined, host)| HostOutcome {
            host: host.clone(),
            result: joined.map_err(BackupError::from).and_then(|r| r),
        })
        .collect()
}

/// Run a cluster phase; fails when any host failed, after all hosts finished.
pub async fn fan_out<F>(
    phase: &str,
    executor: Arc<dyn RemoteExecutor>,
    hosts: &[String],
    parallelism: usize,
    build: F,
) -> Result<()>
where
    F: Fn(&ExecTarget) -> Vec<CommandLine>,
{
    info!(phase, hosts = hosts.len(), parallelism, "Starting cluster phase");
    let outcomes = run_on_hosts(executor, hosts, parallelism, build).await;

    let mut first_error = None;
    let mut failed = 0;
    for outcome in outcomes {
        if let Err(e) = outcome.result {
            error!(phase, host = %outcome.host, error = %e, "Node failed");
            failed += 1;
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => {
            error!(phase, failed, "Cluster phase failed");
            Err(e)
        }
        None => Ok(()),
    }
}

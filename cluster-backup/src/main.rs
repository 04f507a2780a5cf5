//! Cluster Backup - Main entry point
//!
//! Backs up, lists and restores Cassandra cluster backups stored on S3.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cluster_backup::models::BackupDescriptor;
use cluster_backup::remote::{ExecTarget, LocalExecutor, RemoteExecutor, SshExecutor};
use cluster_backup::services::{BackupCatalog, BackupOrchestrator, RestoreOrchestrator};
use cluster_backup::storage::{ObjectStore, S3Store};
use cluster_backup::{utils, Config};
use futures_util::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "cluster-backup.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up the cluster: incremental when today's backup exists, full otherwise
    Backup {
        /// Keyspaces to back up, comma separated (all when omitted)
        #[arg(long, value_delimiter = ',')]
        keyspaces: Vec<String>,

        /// Limit the backup to one table
        #[arg(long)]
        table: Option<String>,

        /// Always take a full snapshot
        #[arg(long)]
        new_snapshot: bool,
    },

    /// List stored backups, newest first
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Restore a keyspace on every configured host
    Restore {
        #[arg(long)]
        keyspace: String,

        /// Backup to restore (latest when omitted)
        #[arg(long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.apply_env();
    config.validate()?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting cluster-backup v{} ({} hosts, bucket {})",
        env!("CARGO_PKG_VERSION"),
        config.cluster.hosts.len(),
        config.storage.bucket
    );

    let store: Arc<dyn ObjectStore> = Arc::new(S3Store::new(&config.storage).await?);
    let catalog = BackupCatalog::new(
        Arc::clone(&store),
        config.storage.bucket.clone(),
        config.storage.base_path.clone(),
    );

    match args.command {
        Command::Backup {
            keyspaces,
            table,
            new_snapshot,
        } => {
            let fresh = BackupDescriptor::create(
                config.storage.base_path.clone(),
                config.storage.bucket.clone(),
                config.cluster.hosts.clone(),
                keyspaces,
                table,
            );
            let orchestrator = BackupOrchestrator::new(&config, executor(&config), store);

            let existing = if new_snapshot {
                None
            } else {
                catalog
                    .find_compatible(fresh.hosts(), fresh.keyspaces(), fresh.table(), fresh.name())
                    .await?
            };
            match existing {
                Some(backup) => orchestrator.update(backup).await?,
                None => orchestrator.snapshot(&fresh).await?,
            }
        }
        Command::List { json } => {
            let backups = catalog.list_all().await?;
            if json {
                let entries: Vec<_> = backups
                    .iter()
                    .map(|b| {
                        serde_json::json!({
                            "name": b.name(),
                            "path": b.effective_path(),
                            "hosts": b.hosts(),
                            "keyspaces": b.keyspaces(),
                            "table": b.table(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for b in backups {
                    let keyspaces = if b.keyspaces().is_empty() {
                        "*".to_string()
                    } else {
                        b.keyspaces().join(",")
                    };
                    println!(
                        "{}\t{}\t{} hosts\t{}\t{}",
                        b.name(),
                        b.effective_path(),
                        b.hosts().len(),
                        keyspaces,
                        b.table().unwrap_or("-")
                    );
                }
            }
        }
        Command::Restore { keyspace, name } => {
            let backup = match name {
                Some(name) => catalog
                    .find_by_name(&name)
                    .await?
                    .with_context(|| format!("backup {name} not found"))?,
                None => catalog.latest().await?,
            };
            let restore = RestoreOrchestrator::new(&config, executor(&config), backup.clone());
            restore_everywhere(&restore, &config, &keyspace).await?;
        }
    }

    Ok(())
}

fn executor(config: &Config) -> Arc<dyn RemoteExecutor> {
    if config.cluster.use_local {
        Arc::new(LocalExecutor::new(config.cluster.use_sudo, config.cluster.nice))
    } else {
        Arc::new(SshExecutor::new(config.cluster.ssh.clone(), config.cluster.use_sudo))
    }
}

async fn restore_everywhere(restore: &RestoreOrchestrator, config: &Config, keyspace: &str) -> Result<()> {
    let targets: Vec<ExecTarget> = config.cluster.hosts.iter().map(ExecTarget::new).collect();

    let results: Vec<_> = stream::iter(&targets)
        .map(|target| async move { (target, restore.restore(target, keyspace).await) })
        .buffer_unordered(config.cluster.connection_pool_size)
        .collect()
        .await;

    let mut failed = 0;
    for (target, result) in results {
        if let Err(e) = result {
            tracing::error!(host = %target, error = %e, "Restore failed");
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("restore of {keyspace} failed on {failed} of {} hosts", targets.len());
    }

    tracing::info!(backup = %restore.backup(), keyspace, "Restore complete");
    Ok(())
}

//! Full and incremental backups across the cluster.
//!
//! A full backup snapshots every node, uploads the snapshot through the
//! agent and always clears the snapshot afterwards. An incremental backup
//! flushes memtables and uploads the new SSTables into an existing backup.

use super::scope::with_cleanup;
use crate::config::{Config, UploadConfig};
use crate::models::BackupDescriptor;
use crate::remote::command::{AwsCredentials, FlushTarget, PutRequest, UploadManifestRequest};
use crate::remote::{fan_out, CommandLine, ExecTarget, NodeCommand, RemoteExecutor, Tools};
use crate::storage::ObjectStore;
use crate::utils::{BackupError, Result};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupKind {
    Full,
    Incremental,
}

impl BackupKind {
    fn is_incremental(self) -> bool {
        self == BackupKind::Incremental
    }
}

pub struct BackupOrchestrator {
    executor: Arc<dyn RemoteExecutor>,
    store: Arc<dyn ObjectStore>,
    tools: Tools,
    parallelism: usize,
    upload: UploadConfig,
    region: String,
    ssenc: bool,
    credentials: Option<AwsCredentials>,
    conf_path: String,
    cqlsh_auth: Option<(String, String)>,
    backup_schema: bool,
}

impl BackupOrchestrator {
    pub fn new(config: &Config, executor: Arc<dyn RemoteExecutor>, store: Arc<dyn ObjectStore>) -> Self {
        let credentials = config.storage.credentials().map(|(key, secret)| AwsCredentials {
            access_key_id: key.to_string(),
            secret_access_key: secret.to_string(),
        });
        let cqlsh_auth = match (&config.cassandra.cqlsh_user, &config.cassandra.cqlsh_password) {
            (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => {
                Some((user.clone(), password.clone()))
            }
            _ => None,
        };

        Self {
            executor,
            store,
            tools: Tools::new(&config.cassandra.tools_bin_dir),
            parallelism: config.cluster.connection_pool_size,
            upload: config.upload.clone(),
            region: config.storage.region.clone(),
            ssenc: config.storage.ssenc,
            credentials,
            conf_path: config.cassandra.conf_path.clone(),
            cqlsh_auth,
            backup_schema: config.cassandra.backup_schema,
        }
    }

    /// Take a full backup.
    ///
    /// Snapshot and upload run inside a cleanup scope: `clearsnapshot` runs
    /// on every node once, whatever happened before. The ring description,
    /// the manifest and the optional schema are only written on success.
    pub async fn snapshot(&self, backup: &BackupDescriptor) -> Result<()> {
        let start = self.render(&self.start_commands(backup, BackupKind::Full)?);
        info!(
            backup = %backup,
            path = %backup.effective_path(),
            hosts = backup.hosts().len(),
            "Starting full backup"
        );

        with_cleanup(
            async {
                self.phase("snapshot", backup, |_| start.clone()).await?;
                self.upload(backup, BackupKind::Full).await
            },
            move || self.clear_snapshots(backup),
        )
        .await?;

        self.write_ring_description(backup).await?;
        self.write_manifest(backup).await?;
        if self.backup_schema {
            self.write_schema(backup).await?;
        }

        info!(backup = %backup, "Full backup complete");
        Ok(())
    }

    /// Add an incremental upload to an existing backup.
    pub async fn update(&self, backup: &BackupDescriptor) -> Result<()> {
        let flush = self.render(&self.start_commands(backup, BackupKind::Incremental)?);
        info!(
            backup = %backup,
            path = %backup.effective_path(),
            hosts = backup.hosts().len(),
            "Starting incremental backup"
        );

        self.phase("flush", backup, |_| flush.clone()).await?;
        self.upload(backup, BackupKind::Incremental).await?;

        self.write_ring_description(backup).await?;
        if self.backup_schema {
            self.write_schema(backup).await?;
        }

        info!(backup = %backup, "Incremental backup complete");
        Ok(())
    }

    /// Commands that capture node state before the upload: snapshots for a
    /// full backup, flushes for an incremental one.
    pub fn start_commands(&self, backup: &BackupDescriptor, kind: BackupKind) -> Result<Vec<NodeCommand>> {
        let keyspaces = backup.keyspaces();
        let table = backup.table();

        let commands = match kind {
            BackupKind::Full => match table {
                Some(table) => {
                    if keyspaces.is_empty() {
                        return Err(BackupError::Config(format!(
                            "table {table} needs a keyspace to be snapshotted"
                        )));
                    }
                    if keyspaces.len() > 1 {
                        warn!(
                            backup = %backup,
                            table,
                            keyspaces = keyspaces.len(),
                            "Table scope applied to every keyspace"
                        );
                    }
                    keyspaces
                        .iter()
                        .map(|keyspace| NodeCommand::Snapshot {
                            tag: backup.name().to_string(),
                            table: Some(table.to_string()),
                            keyspaces: vec![keyspace.clone()],
                        })
                        .collect()
                }
                None => vec![NodeCommand::Snapshot {
                    tag: backup.name().to_string(),
                    table: None,
                    keyspaces: keyspaces.to_vec(),
                }],
            },
            BackupKind::Incremental if keyspaces.is_empty() => vec![NodeCommand::Flush(None)],
            BackupKind::Incremental => keyspaces
                .iter()
                .map(|keyspace| {
                    NodeCommand::Flush(Some(FlushTarget {
                        keyspace: keyspace.clone(),
                        table: table.map(str::to_string),
                    }))
                })
                .collect(),
        };
        Ok(commands)
    }

    /// Agent commands that ship one node's files to `<backup>/<host>`.
    pub fn upload_commands(&self, backup: &BackupDescriptor, target: &ExecTarget, kind: BackupKind) -> Vec<NodeCommand> {
        let incremental = kind.is_incremental();
        vec![
            NodeCommand::CreateUploadManifest(UploadManifestRequest {
                incremental,
                manifest_path: self.upload.manifest_path.clone(),
                snapshot_name: backup.name().to_string(),
                keyspaces: backup.keyspaces().to_vec(),
                table: backup.table().map(str::to_string),
                conf_path: self.conf_path.clone(),
                exclude_tables: self.upload.exclude_tables.clone(),
            }),
            NodeCommand::Put(PutRequest {
                incremental,
                bucket: backup.bucket().to_string(),
                region: self.region.clone(),
                ssenc: self.ssenc,
                base_path: backup.node_prefix(&target.host),
                manifest_path: self.upload.manifest_path.clone(),
                buffer_size: self.upload.buffer_size,
                concurrency: self.upload.concurrency,
                reduced_redundancy: self.upload.reduced_redundancy,
                rate_limit: self.upload.rate_limit,
                quiet: self.upload.quiet,
                credentials: self.credentials.clone(),
            }),
        ]
    }

    async fn upload(&self, backup: &BackupDescriptor, kind: BackupKind) -> Result<()> {
        self.phase("upload", backup, |target| {
            self.render(&self.upload_commands(backup, target, kind))
        })
        .await
    }

    async fn clear_snapshots(&self, backup: &BackupDescriptor) -> Result<()> {
        let clear = self.render(&[NodeCommand::ClearSnapshot {
            tag: backup.name().to_string(),
        }]);
        self.phase("clearsnapshot", backup, |_| clear.clone()).await
    }

    async fn write_ring_description(&self, backup: &BackupDescriptor) -> Result<()> {
        info!(backup = %backup, "Writing ring description");
        let ring = self.run_on_first_host(backup, NodeCommand::Ring).await?;
        self.put(backup, "ring", ring).await
    }

    async fn write_manifest(&self, backup: &BackupDescriptor) -> Result<()> {
        let manifest = backup.to_manifest()?;
        self.store
            .put_object(backup.bucket(), &backup.manifest_key(), Bytes::from(manifest))
            .await?;
        info!(backup = %backup, key = %backup.manifest_key(), "Manifest written");
        Ok(())
    }

    async fn write_schema(&self, backup: &BackupDescriptor) -> Result<()> {
        if backup.keyspaces().is_empty() {
            info!(backup = %backup, "Writing schema for all keyspaces");
            let schema = self.describe_schema(backup, None).await?;
            return self.put(backup, "schema.cql", schema).await;
        }

        for keyspace in backup.keyspaces() {
            info!(backup = %backup, keyspace = %keyspace, "Writing keyspace schema");
            let schema = self.describe_schema(backup, Some(keyspace)).await?;
            self.put(backup, &format!("schema_{keyspace}.cql"), schema).await?;
        }
        Ok(())
    }

    async fn describe_schema(&self, backup: &BackupDescriptor, keyspace: Option<&str>) -> Result<String> {
        let command = NodeCommand::DescribeSchema {
            keyspace: keyspace.map(str::to_string),
            auth: self.cqlsh_auth.clone(),
        };
        self.run_on_first_host(backup, command).await
    }

    /// Cluster-wide facts (ring, schema) are read from the first host.
    async fn run_on_first_host(&self, backup: &BackupDescriptor, command: NodeCommand) -> Result<String> {
        let host = backup
            .hosts()
            .first()
            .ok_or_else(|| BackupError::Config(format!("backup {backup} has no hosts")))?;
        self.executor
            .run(&ExecTarget::new(host.clone()), &command.render(&self.tools))
            .await
    }

    async fn put(&self, backup: &BackupDescriptor, file: &str, content: String) -> Result<()> {
        self.store
            .put_object(backup.bucket(), &backup.artifact_key(file), Bytes::from(content))
            .await
    }

    async fn phase<F>(&self, name: &str, backup: &BackupDescriptor, build: F) -> Result<()>
    where
        F: Fn(&ExecTarget) -> Vec<CommandLine>,
    {
        fan_out(name, Arc::clone(&self.executor), backup.hosts(), self.parallelism, build).await
    }

    fn render(&self, commands: &[NodeCommand]) -> Vec<CommandLine> {
        commands.iter().map(|c| c.render(&self.tools)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::testing::RecordingExecutor;
    use crate::storage::MemoryStore;

    const BUCKET: &str = "backups";

    fn config() -> Config {
        let mut config = Config::default();
        config.storage.bucket = BUCKET.to_string();
        config
    }

    fn descriptor(keyspaces: &[&str], table: Option<&str>) -> BackupDescriptor {
        BackupDescriptor::with_name(
            "20230101",
            "prod",
            BUCKET,
            vec!["cass-01".to_string(), "cass-02".to_string()],
            keyspaces.iter().map(|k| k.to_string()).collect(),
            table.map(str::to_string),
        )
        .unwrap()
    }

    struct Harness {
        executor: Arc<RecordingExecutor>,
        store: Arc<MemoryStore>,
        orchestrator: BackupOrchestrator,
    }

    fn harness(config: &Config, executor: RecordingExecutor) -> Harness {
        let executor = Arc::new(executor.respond("nodetool ring", "Address Rack Status"));
        let store = Arc::new(MemoryStore::new());
        let orchestrator = BackupOrchestrator::new(config, executor.clone(), store.clone());
        Harness {
            executor,
            store,
            orchestrator,
        }
    }

    #[tokio::test]
    async fn test_full_backup_runs_phases_in_order() {
        let h = harness(&config(), RecordingExecutor::new());
        let backup = descriptor(&["ks1"], None);

        h.orchestrator.snapshot(&backup).await.unwrap();

        let commands = h.executor.commands_for("cass-02");
        assert_eq!(commands.len(), 4);
        assert_eq!(commands[0], "/usr/bin/nodetool snapshot -t 20230101 ks1");
        assert!(commands[1].contains("create-upload-manifest"));
        assert!(commands[2].contains("put --s3-bucket-name=backups"));
        assert!(commands[2].contains("--s3-base-path=prod/20230101/cass-02"));
        assert_eq!(commands[3], "/usr/bin/nodetool clearsnapshot -t \"20230101\"");

        // ring is read from the first host only
        assert_eq!(h.executor.count("nodetool ring"), 1);
        assert_eq!(
            h.executor.commands_for("cass-01").last().map(String::as_str),
            Some("/usr/bin/nodetool ring")
        );

        assert_eq!(
            h.store.keys(BUCKET),
            vec!["prod/20230101/manifest.json", "prod/20230101/ring"]
        );
        let stored = h.store.get(BUCKET, "prod/20230101/manifest.json").unwrap();
        let restored = BackupDescriptor::from_manifest(&stored, BUCKET).unwrap();
        assert_eq!(restored.keyspaces(), ["ks1"]);
    }

    #[test]
    fn test_table_scope_snapshots_each_keyspace() {
        let h = harness(&config(), RecordingExecutor::new());
        let backup = descriptor(&["ks1", "ks2"], Some("cf1"));

        let commands = h.orchestrator.start_commands(&backup, BackupKind::Full).unwrap();
        let lines: Vec<String> = h
            .orchestrator
            .render(&commands)
            .iter()
            .map(|c| c.as_str().to_string())
            .collect();
        assert_eq!(
            lines,
            vec![
                "/usr/bin/nodetool snapshot -cf cf1 -t 20230101 ks1",
                "/usr/bin/nodetool snapshot -cf cf1 -t 20230101 ks2",
            ]
        );
    }

    #[tokio::test]
    async fn test_table_scope_without_keyspace_is_rejected() {
        let h = harness(&config(), RecordingExecutor::new());
        let err = h
            .orchestrator
            .snapshot(&descriptor(&[], Some("cf1")))
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
        assert!(h.executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_incremental_without_keyspaces_flushes_once() {
        let h = harness(&config(), RecordingExecutor::new());
        let backup = descriptor(&[], None);

        h.orchestrator.update(&backup).await.unwrap();

        for host in ["cass-01", "cass-02"] {
            let flushes: Vec<_> = h
                .executor
                .commands_for(host)
                .into_iter()
                .filter(|c| c.contains("flush"))
                .collect();
            assert_eq!(flushes, vec!["/usr/bin/nodetool flush"]);
        }
        assert_eq!(h.executor.count("clearsnapshot"), 0);
        assert_eq!(h.executor.count("--incremental_backups create-upload-manifest"), 2);
        assert_eq!(h.executor.count("--incremental_backups put"), 2);
        assert_eq!(h.store.keys(BUCKET), vec!["prod/20230101/ring"]);
    }

    #[test]
    fn test_incremental_flush_per_keyspace() {
        let h = harness(&config(), RecordingExecutor::new());
        let backup = descriptor(&["ks1", "ks2"], Some("cf1"));

        let commands = h.orchestrator.start_commands(&backup, BackupKind::Incremental).unwrap();
        let lines: Vec<String> = h
            .orchestrator
            .render(&commands)
            .iter()
            .map(|c| c.as_str().to_string())
            .collect();
        assert_eq!(
            lines,
            vec!["/usr/bin/nodetool flush ks1 cf1", "/usr/bin/nodetool flush ks2 cf1"]
        );
    }

    #[tokio::test]
    async fn test_upload_failure_still_clears_snapshots() {
        let h = harness(&config(), RecordingExecutor::new().fail_on("--s3-base-path=prod/20230101/cass-02"));
        let backup = descriptor(&["ks1"], None);

        let err = h.orchestrator.snapshot(&backup).await.unwrap_err();

        assert!(matches!(err, BackupError::RemoteCommand { ref host, .. } if host == "cass-02"));
        assert_eq!(h.executor.count("clearsnapshot"), 2);
        for host in ["cass-01", "cass-02"] {
            assert_eq!(
                h.executor.commands_for(host).last().map(String::as_str),
                Some("/usr/bin/nodetool clearsnapshot -t \"20230101\"")
            );
        }
        assert_eq!(h.executor.count("nodetool ring"), 0);
        assert!(h.store.keys(BUCKET).is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_failure_still_clears_snapshots() {
        let h = harness(&config(), RecordingExecutor::new().fail_on("nodetool snapshot"));
        let backup = descriptor(&[], None);

        let err = h.orchestrator.snapshot(&backup).await.unwrap_err();

        assert!(matches!(err, BackupError::RemoteCommand { .. }));
        assert_eq!(h.executor.count("put"), 0);
        assert_eq!(h.executor.count("clearsnapshot"), 2);
        assert!(h.store.keys(BUCKET).is_empty());
    }

    #[test]
    fn test_upload_forwards_settings_and_credentials() {
        let mut config = config();
        config.upload.concurrency = 16;
        config.upload.rate_limit = 2048;
        config.upload.reduced_redundancy = true;
        config.storage.ssenc = true;
        config.storage.aws_access_key_id = Some("AKIA".to_string());
        let h = harness(&config, RecordingExecutor::new());
        let backup = descriptor(&["ks1"], None);
        let target = ExecTarget::new("cass-01");

        // a key without its secret is not forwarded
        let rendered = h.orchestrator.render(&h.orchestrator.upload_commands(&backup, &target, BackupKind::Full));
        let put = rendered[1].as_str();
        assert!(put.contains("--s3-ssenc"));
        assert!(put.contains("--concurrency=16"));
        assert!(put.contains("--reduced-redundancy --rate-limit=2048"));
        assert!(!put.contains("--aws-access-key-id"));

        config.storage.aws_secret_access_key = Some("s3cr3t".to_string());
        let h = harness(&config, RecordingExecutor::new());
        let rendered = h.orchestrator.render(&h.orchestrator.upload_commands(&backup, &target, BackupKind::Full));
        assert!(rendered[1]
            .as_str()
            .ends_with("--aws-access-key-id=AKIA --aws-secret-access-key=s3cr3t"));
        assert!(!rendered[1].redacted().contains("s3cr3t"));
    }

    #[tokio::test]
    async fn test_schema_written_per_keyspace() {
        let mut config = config();
        config.cassandra.backup_schema = true;
        let h = harness(
            &config,
            RecordingExecutor::new()
                .respond("DESCRIBE KEYSPACE ks1", "CREATE KEYSPACE ks1;")
                .respond("DESCRIBE KEYSPACE ks2", "CREATE KEYSPACE ks2;"),
        );

        h.orchestrator.snapshot(&descriptor(&["ks1", "ks2"], None)).await.unwrap();

        assert_eq!(
            h.store.get(BUCKET, "prod/20230101/schema_ks1.cql").unwrap(),
            Bytes::from("CREATE KEYSPACE ks1;")
        );
        assert!(h.store.get(BUCKET, "prod/20230101/schema_ks2.cql").is_some());
        assert!(h.store.get(BUCKET, "prod/20230101/schema.cql").is_none());
    }

    #[tokio::test]
    async fn test_schema_for_all_keyspaces() {
        let mut config = config();
        config.cassandra.backup_schema = true;
        config.cassandra.cqlsh_user = Some("cassandra".to_string());
        config.cassandra.cqlsh_password = Some("pw".to_string());
        let h = harness(&config, RecordingExecutor::new().respond("DESCRIBE SCHEMA", "CREATE ..."));

        h.orchestrator.update(&descriptor(&[], None)).await.unwrap();

        assert_eq!(h.executor.count("cqlsh -u cassandra -p pw -e 'DESCRIBE SCHEMA;'"), 1);
        assert_eq!(
            h.store.keys(BUCKET),
            vec!["prod/20230101/ring", "prod/20230101/schema.cql"]
        );
    }
}

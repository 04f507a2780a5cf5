//! Commands sent to Cassandra nodes.
//!
//! Every node-side action is a [`NodeCommand`]. It is turned into a shell
//! command line only when handed to a transport, through [`NodeCommand::render`].
//! The agent flags below are the command-line contract of
//! `cassandra-backups-agent`.

use std::fmt;

/// Name of the per-node backup agent binary.
pub const AGENT_BINARY: &str = "cassandra-backups-agent";

/// Locations of the node-side tools.
#[derive(Debug, Clone)]
pub struct Tools {
    pub nodetool: String,
    pub cqlsh: String,
    pub agent: String,
}

impl Tools {
    pub fn new(tools_bin_dir: &str) -> Self {
        let dir = tools_bin_dir.trim_end_matches('/');
        Self {
            nodetool: format!("{dir}/nodetool"),
            cqlsh: format!("{dir}/cqlsh"),
            agent: AGENT_BINARY.to_string(),
        }
    }
}

/// Keyspace (and optionally table) a flush is limited to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushTarget {
    pub keyspace: String,
    pub table: Option<String>,
}

/// Access key pair forwarded to the agent.
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .finish()
    }
}

/// Arguments of `create-upload-manifest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadManifestRequest {
    pub incremental: bool,
    pub manifest_path: String,
    pub snapshot_name: String,
    pub keyspaces: Vec<String>,
    pub table: Option<String>,
    pub conf_path: String,
    pub exclude_tables: String,
}

/// Arguments of `put`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRequest {
    pub incremental: bool,
    pub bucket: String,
    pub region: String,
    pub ssenc: bool,
    pub base_path: String,
    pub manifest_path: String,
    pub buffer_size: u64,
    pub concurrency: usize,
    pub reduced_redundancy: bool,
    pub rate_limit: u64,
    pub quiet: bool,
    pub credentials: Option<AwsCredentials>,
}

/// Arguments of `fetch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub keyspace: String,
    pub snapshot_path: String,
    pub credentials: Option<AwsCredentials>,
    pub s3_host: String,
    pub bucket: String,
    pub host: String,
    pub tools_bin_dir: String,
    pub restore_dir: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeCommand {
    /// `nodetool snapshot`, optionally limited to one table.
    Snapshot {
        tag: String,
        table: Option<String>,
        keyspaces: Vec<String>,
    },
    /// `nodetool flush`; `None` flushes every keyspace.
    Flush(Option<FlushTarget>),
    /// `nodetool clearsnapshot` for one tag.
    ClearSnapshot { tag: String },
    /// `nodetool ring`
    Ring,
    /// `cqlsh -e 'DESCRIBE ...'` for one keyspace or the whole schema.
    DescribeSchema {
        keyspace: Option<String>,
        auth: Option<(String, String)>,
    },
    CreateUploadManifest(UploadManifestRequest),
    Put(PutRequest),
    Fetch(FetchRequest),
}

impl NodeCommand {
    /// Short name used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            NodeCommand::Snapshot { .. } => "snapshot",
            NodeCommand::Flush(_) => "flush",
            NodeCommand::ClearSnapshot { .. } => "clearsnapshot",
            NodeCommand::Ring => "ring",
            NodeCommand::DescribeSchema { .. } => "describe-schema",
            NodeCommand::CreateUploadManifest(_) => "create-upload-manifest",
            NodeCommand::Put(_) => "put",
            NodeCommand::Fetch(_) => "fetch",
        }
    }

    /// Render the shell command line.
    pub fn render(&self, tools: &Tools) -> CommandLine {
        let mut line = Args::default();
        match self {
            NodeCommand::Snapshot {
                tag,
                table,
                keyspaces,
            } => {
                line.push(&tools.nodetool).push("snapshot");
                if let Some(table) = table {
                    line.push("-cf").push(table);
                }
                line.push("-t").push(tag);
                for keyspace in keyspaces {
                    line.push(keyspace);
                }
            }
            NodeCommand::Flush(target) => {
                line.push(&tools.nodetool).push("flush");
                if let Some(target) = target {
                    line.push(&target.keyspace);
                    if let Some(table) = &target.table {
                        line.push(table);
                    }
                }
            }
            NodeCommand::ClearSnapshot { tag } => {
                line.push(&tools.nodetool)
                    .push("clearsnapshot")
                    .push("-t")
                    .push(format!("\"{tag}\""));
            }
            NodeCommand::Ring => {
                line.push(&tools.nodetool).push("ring");
            }
            NodeCommand::DescribeSchema { keyspace, auth } => {
                line.push(&tools.cqlsh);
                if let Some(keyspace) = keyspace {
                    line.push("-k").push(keyspace);
                }
                if let Some((user, password)) = auth {
                    line.push("-u").push(user).secret("-p ", password);
                }
                let statement = match keyspace {
                    Some(keyspace) => format!("'DESCRIBE KEYSPACE {keyspace};'"),
                    None => "'DESCRIBE SCHEMA;'".to_string(),
                };
                line.push("-e").push(statement);
            }
            NodeCommand::CreateUploadManifest(req) => {
                line.push(&tools.agent);
                if req.incremental {
                    line.push("--incremental_backups");
                }
                line.push("create-upload-manifest")
                    .flag("--manifest_path", &req.manifest_path)
                    .flag("--snapshot_name", &req.snapshot_name)
                    .flag("--snapshot_keyspaces", req.keyspaces.join(","));
                if let Some(table) = &req.table {
                    line.flag("--snapshot_table", table);
                }
                line.flag("--conf_path", &req.conf_path)
                    .flag("--exclude_tables", &req.exclude_tables);
            }
            NodeCommand::Put(req) => {
                line.push(&tools.agent);
                if req.incremental {
                    line.push("--incremental_backups");
                }
                line.push("put")
                    .flag("--s3-bucket-name", &req.bucket)
                    .flag("--s3-bucket-region", &req.region);
                if req.ssenc {
                    line.push("--s3-ssenc");
                }
                line.flag("--s3-base-path", &req.base_path)
                    .flag("--manifest", &req.manifest_path)
                    .flag("--bufsize", req.buffer_size)
                    .flag("--concurrency", req.concurrency);
                if req.reduced_redundancy {
                    line.push("--reduced-redundancy");
                }
                if req.rate_limit > 0 {
                    line.flag("--rate-limit", req.rate_limit);
                }
                if req.quiet {
                    line.push("--quiet");
                }
                if let Some(creds) = &req.credentials {
                    line.credentials(creds);
                }
            }
            NodeCommand::Fetch(req) => {
                line.push(&tools.agent)
                    .push("fetch")
                    .flag("--keyspace", &req.keyspace)
                    .flag("--snapshot-path", &req.snapshot_path);
                if let Some(creds) = &req.credentials {
                    line.credentials(creds);
                }
                line.flag("--s3-host", &req.s3_host)
                    .flag("--s3-bucket-name", &req.bucket)
                    .flag("--host", &req.host)
                    .flag("--cassandra-tools-bin-dir", &req.tools_bin_dir)
                    .flag("--restore-dir", &req.restore_dir);
            }
        }
        line.finish(self.label())
    }
}

/// A rendered command: the line to execute and a copy safe to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    label: &'static str,
    line: String,
    redacted: String,
}

impl CommandLine {
    /// Wrap an ad-hoc command line that carries no secrets.
    pub fn raw(label: &'static str, line: impl Into<String>) -> Self {
        let line = line.into();
        Self {
            label,
            redacted: line.clone(),
            line,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// The exact line handed to the shell.
    pub fn as_str(&self) -> &str {
        &self.line
    }

    /// The line with secrets masked.
    pub fn redacted(&self) -> &str {
        &self.redacted
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted)
    }
}

/// Builds the real and the redacted line side by side.
#[derive(Default)]
struct Args {
    line: Vec<String>,
    redacted: Vec<String>,
}

impl Args {
    fn push(&mut self, arg: impl fmt::Display) -> &mut Self {
        let arg = arg.to_string();
        self.redacted.push(arg.clone());
        self.line.push(arg);
        self
    }

    fn flag(&mut self, name: &str, value: impl fmt::Display) -> &mut Self {
        self.push(format!("{name}={value}"))
    }

    fn secret(&mut self, prefix: &str, value: &str) -> &mut Self {
        self.line.push(format!("{prefix}{value}"));
        self.redacted.push(format!("{prefix}***"));
        self
    }

    fn credentials(&mut self, creds: &AwsCredentials) -> &mut Self {
        self.flag("--aws-access-key-id", &creds.access_key_id)
            .secret("--aws-secret-access-key=", &creds.secret_access_key)
    }

    fn finish(self, label: &'static str) -> CommandLine {
        CommandLine {
            label,
            line: self.line.join(" "),
            redacted: self.redacted.join(" "),
        }
    }
}

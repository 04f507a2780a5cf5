//! Backup descriptor: the identity and scope of one stored backup.
//!
//! Backups are laid out in a bucket as
//!
//! ```text
//! <bucket>:/<base_path>/<name>/<node-host>/...
//! <bucket>:/<base_path>/<name>/manifest.json
//! <bucket>:/<base_path>/<name>/ring
//! <bucket>:/<base_path>/<name>/schema.cql | schema_<keyspace>.cql
//! ```
//!
//! The manifest is the durable form of a descriptor; incremental backups reuse
//! the manifest written by the full backup they extend.

use crate::utils::{BackupError, Result};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Date format used for backup names.
pub const NAME_FORMAT: &str = "%Y%m%d";

/// File name of the manifest stored at the root of every backup.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Wire form of a descriptor, stored as `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ManifestFile {
    name: String,
    base_path: String,
    hosts: Vec<String>,
    #[serde(deserialize_with = "nullable_list")]
    keyspaces: Vec<String>,
    // Required but nullable: a manifest without the key is rejected.
    #[serde(deserialize_with = "Option::deserialize")]
    table: Option<String>,
}

/// Older manifests store `null` when every keyspace was backed up.
fn nullable_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupDescriptor {
    name: String,
    base_path: String,
    bucket: String,
    hosts: Vec<String>,
    keyspaces: Vec<String>,
    table: Option<String>,
    date: NaiveDate,
}

impl BackupDescriptor {
    /// Describe a new backup named after the current UTC date.
    pub fn create(
        base_path: impl Into<String>,
        bucket: impl Into<String>,
        hosts: Vec<String>,
        keyspaces: Vec<String>,
        table: Option<String>,
    ) -> Self {
        let date = Utc::now().date_naive();
        Self {
            name: date.format(NAME_FORMAT).to_string(),
            base_path: base_path.into(),
            bucket: bucket.into(),
            hosts,
            keyspaces,
            table,
            date,
        }
    }

    /// Describe a backup with an explicit name. Fails when the name is not a
    /// `YYYYMMDD` date.
    pub fn with_name(
        name: impl Into<String>,
        base_path: impl Into<String>,
        bucket: impl Into<String>,
        hosts: Vec<String>,
        keyspaces: Vec<String>,
        table: Option<String>,
    ) -> Result<Self> {
        let name = name.into();
        let date = parse_name(&name)?;
        Ok(Self {
            name,
            base_path: base_path.into(),
            bucket: bucket.into(),
            hosts,
            keyspaces,
            table,
            date,
        })
    }

    /// Rebuild a descriptor from a stored manifest. The bucket is not part of
    /// the manifest format and is supplied by the caller.
    pub fn from_manifest(data: &[u8], bucket: &str) -> Result<Self> {
        let manifest: ManifestFile = serde_json::from_slice(data)
            .map_err(|e| BackupError::ManifestParse(e.to_string()))?;
        Self::with_name(
            manifest.name,
            manifest.base_path,
            bucket,
            manifest.hosts,
            manifest.keyspaces,
            manifest.table,
        )
    }

    /// Canonical manifest JSON.
    pub fn to_manifest(&self) -> Result<String> {
        let manifest = ManifestFile {
            name: self.name.clone(),
            base_path: self.base_path.clone(),
            hosts: self.hosts.clone(),
            keyspaces: self.keyspaces.clone(),
            table: self.table.clone(),
        };
        Ok(serde_json::to_string(&manifest)?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Prefix the backup was created under, without the backup name.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn keyspaces(&self) -> &[String] {
        &self.keyspaces
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    /// Creation date parsed from the name.
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Root of this backup in the bucket: `base_path/name`.
    pub fn effective_path(&self) -> String {
        join_key(&[&self.base_path, &self.name])
    }

    /// Key of an artifact stored directly under the backup root.
    pub fn artifact_key(&self, file: &str) -> String {
        join_key(&[&self.effective_path(), file])
    }

    pub fn manifest_key(&self) -> String {
        self.artifact_key(MANIFEST_FILE)
    }

    /// Per-node data prefix: `base_path/name/<host>`.
    pub fn node_prefix(&self, host: &str) -> String {
        self.artifact_key(host)
    }
}

impl PartialOrd for BackupDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BackupDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.date
            .cmp(&other.date)
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.base_path.cmp(&other.base_path))
    }
}

impl fmt::Display for BackupDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Parse a backup name into its creation date.
pub fn parse_name(name: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(name, NAME_FORMAT)
        .map_err(|e| BackupError::ManifestParse(format!("backup name {name:?} is not a date: {e}")))
}

/// Join key segments with `/`, without doubling separators at the seams.
pub fn join_key(parts: &[&str]) -> String {
    let mut key = String::new();
    for (i, part) in parts.iter().enumerate() {
        let part = if i == 0 {
            part.trim_end_matches('/')
        } else {
            part.trim_matches('/')
        };
        if part.is_empty() {
            continue;
        }
        if !key.is_empty() {
            key.push('/');
        }
        key.push_str(part);
    }
    key
}

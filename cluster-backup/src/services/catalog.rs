//! Catalog of the backups stored under a prefix.
//!
//! The bucket is read once, on first use, and the result is kept for the
//! lifetime of the catalog. Build a new catalog to see newer backups.

use crate::models::descriptor::{join_key, BackupDescriptor, MANIFEST_FILE};
use crate::storage::ObjectStore;
use crate::utils::{BackupError, Result};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

pub struct BackupCatalog {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    base_path: String,
    backups: OnceCell<Vec<BackupDescriptor>>,
}

impl BackupCatalog {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, base_path: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            base_path: base_path.into(),
            backups: OnceCell::new(),
        }
    }

    /// Every readable backup, newest first.
    pub async fn list_all(&self) -> Result<&[BackupDescriptor]> {
        let backups = self.backups.get_or_try_init(|| self.read_store()).await?;
        Ok(backups.as_slice())
    }

    /// The most recent backup.
    pub async fn latest(&self) -> Result<&BackupDescriptor> {
        self.list_all()
            .await?
            .first()
            .ok_or_else(|| BackupError::EmptyCatalog {
                bucket: self.bucket.clone(),
                base_path: self.base_path.clone(),
            })
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<&BackupDescriptor>> {
        Ok(self.list_all().await?.iter().find(|b| b.name() == name))
    }

    /// The newest backup taken with exactly this scope and name.
    pub async fn find_compatible(
        &self,
        hosts: &[String],
        keyspaces: &[String],
        table: Option<&str>,
        name: &str,
    ) -> Result<Option<&BackupDescriptor>> {
        Ok(self.list_all().await?.iter().find(|b| {
            b.hosts() == hosts && b.keyspaces() == keyspaces && b.table() == table && b.name() == name
        }))
    }

    async fn read_store(&self) -> Result<Vec<BackupDescriptor>> {
        let prefix = if self.base_path.is_empty() || self.base_path.ends_with('/') {
            self.base_path.clone()
        } else {
            format!("{}/", self.base_path)
        };

        let candidates = self.store.list(&self.bucket, &prefix, "/").await?;
        let mut backups = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            // The listing may include the prefix itself and plain objects
            if candidate == prefix || !candidate.ends_with('/') {
                continue;
            }
            let manifest_key = join_key(&[&candidate, MANIFEST_FILE]);

            let data = match self.store.get_object(&self.bucket, &manifest_key).await {
                Ok(data) => data,
                Err(e) if e.is_not_found() => {
                    warn!(manifest = %manifest_key, "Skipping backup without manifest");
                    continue;
                }
                Err(e) => {
                    warn!(manifest = %manifest_key, error = %e, "Skipping unreadable manifest");
                    continue;
                }
            };

            match BackupDescriptor::from_manifest(&data, &self.bucket) {
                Ok(descriptor) => backups.push(descriptor),
                Err(e) => {
                    error!(manifest = %manifest_key, error = %e, "Parsing manifest failed");
                }
            }
        }

        backups.sort_by(|a, b| b.cmp(a));
        info!(
            bucket = %self.bucket,
            base_path = %self.base_path,
            count = backups.len(),
            "Loaded backup catalog"
        );
        Ok(backups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    const BUCKET: &str = "backups";

    fn manifest(name: &str, hosts: &[&str], keyspaces: &[&str], table: Option<&str>) -> String {
        BackupDescriptor::with_name(
            name,
            "prod",
            BUCKET,
            hosts.iter().map(|h| h.to_string()).collect(),
            keyspaces.iter().map(|k| k.to_string()).collect(),
            table.map(str::to_string),
        )
        .unwrap()
        .to_manifest()
        .unwrap()
    }

    fn catalog(store: MemoryStore) -> BackupCatalog {
        BackupCatalog::new(Arc::new(store), BUCKET, "prod")
    }

    fn names(backups: &[BackupDescriptor]) -> Vec<&str> {
        backups.iter().map(|b| b.name()).collect()
    }

    #[tokio::test]
    async fn test_list_all_sorted_newest_first() {
        let store = MemoryStore::new();
        for name in ["20230101", "20230301", "20230215"] {
            store.insert(BUCKET, &format!("prod/{name}/manifest.json"), manifest(name, &["h1"], &[], None));
            store.insert(BUCKET, &format!("prod/{name}/h1/data.db"), "data");
        }

        let catalog = catalog(store);
        let backups = catalog.list_all().await.unwrap();
        assert_eq!(names(backups), vec!["20230301", "20230215", "20230101"]);
    }

    #[tokio::test]
    async fn test_list_all_skips_missing_and_invalid_manifests() {
        let store = MemoryStore::new();
        store.insert(BUCKET, "prod/20230101/manifest.json", manifest("20230101", &["h1"], &[], None));
        store.insert(BUCKET, "prod/20230102/h1/data.db", "no manifest here");
        store.insert(BUCKET, "prod/20230103/manifest.json", "{not json");

        let catalog = catalog(store);
        let backups = catalog.list_all().await.unwrap();
        assert_eq!(names(backups), vec!["20230101"]);
    }

    #[tokio::test]
    async fn test_list_all_is_cached() {
        let store = Arc::new(MemoryStore::new());
        store.insert(BUCKET, "prod/20230101/manifest.json", manifest("20230101", &["h1"], &[], None));

        let catalog = BackupCatalog::new(store.clone(), BUCKET, "prod");
        assert_eq!(catalog.list_all().await.unwrap().len(), 1);

        store.insert(BUCKET, "prod/20230102/manifest.json", manifest("20230102", &["h1"], &[], None));
        assert_eq!(catalog.list_all().await.unwrap().len(), 1);
        assert_eq!(catalog.latest().await.unwrap().name(), "20230101");

        let fresh = BackupCatalog::new(store, BUCKET, "prod");
        assert_eq!(fresh.latest().await.unwrap().name(), "20230102");
    }

    #[tokio::test]
    async fn test_latest_on_empty_catalog() {
        let store = MemoryStore::new();
        store.insert(BUCKET, "prod/20230103/manifest.json", "[]");

        let err = catalog(store).latest().await.unwrap_err();
        assert!(matches!(err, BackupError::EmptyCatalog { .. }));
    }

    #[tokio::test]
    async fn test_find_by_name() {
        let store = MemoryStore::new();
        store.insert(BUCKET, "prod/20230101/manifest.json", manifest("20230101", &["h1"], &[], None));

        let catalog = catalog(store);
        assert!(catalog.find_by_name("20230101").await.unwrap().is_some());
        assert!(catalog.find_by_name("20990101").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_compatible_requires_exact_match() {
        let store = MemoryStore::new();
        store.insert(
            BUCKET,
            "prod/20230101/manifest.json",
            manifest("20230101", &["h1", "h2"], &["ks1"], Some("cf1")),
        );
        let catalog = catalog(store);

        let hosts = vec!["h1".to_string(), "h2".to_string()];
        let keyspaces = vec!["ks1".to_string()];

        let found = catalog
            .find_compatible(&hosts, &keyspaces, Some("cf1"), "20230101")
            .await
            .unwrap();
        assert_eq!(found.map(|b| b.name()), Some("20230101"));

        let other_hosts = vec!["h1".to_string()];
        let other_keyspaces = vec!["ks1".to_string(), "ks2".to_string()];
        let misses = [
            catalog.find_compatible(&other_hosts, &keyspaces, Some("cf1"), "20230101").await,
            catalog.find_compatible(&hosts, &other_keyspaces, Some("cf1"), "20230101").await,
            catalog.find_compatible(&hosts, &keyspaces, None, "20230101").await,
            catalog.find_compatible(&hosts, &keyspaces, Some("cf2"), "20230101").await,
            catalog.find_compatible(&hosts, &keyspaces, Some("cf1"), "20230102").await,
        ];
        for miss in misses {
            assert!(miss.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_base_path_with_trailing_slash() {
        let store = MemoryStore::new();
        store.insert(BUCKET, "prod/20230101/manifest.json", manifest("20230101", &["h1"], &[], None));

        let catalog = BackupCatalog::new(Arc::new(store), BUCKET, "prod/");
        assert_eq!(catalog.list_all().await.unwrap().len(), 1);
    }
}

//! In-process object store.

use super::ObjectStore;
use crate::utils::{BackupError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::BTreeSet;

/// Object store kept in memory, keyed by `(bucket, key)`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: DashMap<(String, String), Bytes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object without going through the async trait.
    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Bytes>) {
        self.objects
            .insert((bucket.to_string(), key.to_string()), body.into());
    }

    /// Read an object without going through the async trait.
    pub fn get(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// All keys stored in a bucket, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().0 == bucket)
            .map(|entry| entry.key().1.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, bucket: &str, prefix: &str, delimiter: &str) -> Result<Vec<String>> {
        let mut children = BTreeSet::new();
        for entry in self.objects.iter() {
            let (b, key) = entry.key();
            if b != bucket {
                continue;
            }
            let Some(rest) = key.strip_prefix(prefix) else {
                continue;
            };
            match (delimiter.is_empty(), rest.find(delimiter)) {
                (false, Some(pos)) => {
                    children.insert(format!("{prefix}{}", &rest[..pos + delimiter.len()]));
                }
                _ => {
                    children.insert(key.clone());
                }
            }
        }
        Ok(children.into_iter().collect())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        self.get(bucket, key).ok_or_else(|| BackupError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<()> {
        self.insert(bucket, key, body);
        Ok(())
    }
}

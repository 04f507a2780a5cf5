//! Object storage access.
//!
//! The orchestrators only need three primitives: list the children of a
//! prefix, read a blob and write a blob. Anything else (multipart transfer of
//! node data, encryption) is done by the per-node agent.

pub mod memory;
pub mod s3;

use crate::utils::Result;
use async_trait::async_trait;
use bytes::Bytes;

pub use memory::MemoryStore;
pub use s3::S3Store;

/// Blob storage addressed by bucket and key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List keys and common prefixes directly under `prefix`, grouped on
    /// `delimiter`. Common prefixes keep their trailing delimiter.
    async fn list(&self, bucket: &str, prefix: &str, delimiter: &str) -> Result<Vec<String>>;

    /// Read a whole object. Returns `BackupError::ObjectNotFound` when absent.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes>;

    /// Write a whole object, replacing any previous content.
    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<()>;
}

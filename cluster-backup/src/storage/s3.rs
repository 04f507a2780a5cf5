//! S3-compatible object store.

use super::ObjectStore;
use crate::config::StorageConfig;
use crate::utils::{BackupError, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::debug;

/// Object store backed by the AWS SDK.
pub struct S3Store {
    client: Client,
}

impl S3Store {
    /// Build a client from the storage settings. Explicit credentials are used
    /// only when both key and secret are configured, otherwise the default
    /// provider chain (environment, profile, instance role) applies.
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));
        if let Some((key, secret)) = config.credentials() {
            loader = loader.credentials_provider(Credentials::new(
                key,
                secret,
                None,
                None,
                "cluster-backup",
            ));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(host) = &config.connection_host {
            builder = builder
                .endpoint_url(endpoint_url(host))
                .force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
        })
    }

    /// Wrap an already configured client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn endpoint_url(host: &str) -> String {
    if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

/// Host name the per-node agent should use to reach S3 in `region`.
pub fn s3_connection_host(region: &str) -> String {
    match region {
        "" | "us-east-1" => "s3.amazonaws.com".to_string(),
        region => format!("s3.{region}.amazonaws.com"),
    }
}

fn storage_error<E>(op: &str, bucket: &str, key: &str, err: E) -> BackupError
where
    E: std::error::Error,
{
    BackupError::Storage(format!(
        "{op} {bucket}/{key} failed: {}",
        DisplayErrorContext(err)
    ))
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list(&self, bucket: &str, prefix: &str, delimiter: &str) -> Result<Vec<String>> {
        let mut children = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .delimiter(delimiter)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| storage_error("list", bucket, prefix, e))?;

            children.extend(
                response
                    .common_prefixes()
                    .iter()
                    .filter_map(|p| p.prefix().map(str::to_string)),
            );
            children.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|o| o.key().map(str::to_string)),
            );

            match (response.is_truncated(), response.next_continuation_token()) {
                (Some(true), Some(token)) => continuation_token = Some(token.to_string()),
                _ => break,
            }
        }

        debug!(bucket, prefix, count = children.len(), "Listed prefix");
        Ok(children)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let response = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(response) => response,
            Err(err) => {
                let service_error = err.into_service_error();
                if service_error.is_no_such_key() {
                    return Err(BackupError::ObjectNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    });
                }
                return Err(storage_error("get", bucket, key, service_error));
            }
        };

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| storage_error("read", bucket, key, e))?;
        Ok(body.into_bytes())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| storage_error("put", bucket, key, e))?;
        debug!(bucket, key, "Wrote object");
        Ok(())
    }
}

//! Remote object store tier backed by OpenDAL.

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use bytes::Bytes;
use castforge_common::{Error, Result, StorageTier};
use opendal::{services, Operator};

use super::StorageProvider;
use crate::config::StorageProviderConfig;

/// Object-store provider. Any OpenDAL service works; S3 is the one exposed
/// through configuration.
#[derive(Clone)]
pub struct RemoteStorage {
    op: Operator,
}

impl RemoteStorage {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    /// Build the remote tier from config. Returns `None` for the local-only
    /// provider.
    pub fn from_config(config: &StorageProviderConfig) -> AnyResult<Option<Self>> {
        match config {
            StorageProviderConfig::Local => Ok(None),
            StorageProviderConfig::S3 {
                bucket,
                root,
                region,
                endpoint,
                access_key_id,
                secret_access_key,
                enable_virtual_host_style,
            } => {
                tracing::info!("Configuring S3 storage with bucket: {}, region: {:?}", bucket, region);

                let mut builder = services::S3::default()
                    .bucket(bucket)
                    .root(root.trim_start_matches('/'));

                if let Some(region) = region {
                    builder = builder.region(region);
                }
                if let Some(endpoint) = endpoint {
                    builder = builder.endpoint(endpoint);
                }
                if let Some(access_key_id) = access_key_id {
                    builder = builder.access_key_id(access_key_id);
                }
                if let Some(secret_access_key) = secret_access_key {
                    builder = builder.secret_access_key(secret_access_key);
                }
                if *enable_virtual_host_style {
                    builder = builder.enable_virtual_host_style();
                }

                let op = Operator::new(builder)?.finish();
                Ok(Some(Self::new(op)))
            }
        }
    }

    /// In-process object store, handy for exercising the OpenDAL path.
    pub fn memory() -> AnyResult<Self> {
        let op = Operator::new(services::Memory::default())?.finish();
        Ok(Self::new(op))
    }

    /// Probe the backend. Failure is reported, not fatal.
    pub async fn check(&self) {
        match self.op.check().await {
            Ok(()) => tracing::info!("Remote storage connection verified"),
            Err(e) => tracing::warn!(
                "Remote storage connection test failed: {}, continuing anyway",
                e
            ),
        }
    }
}

#[async_trait]
impl StorageProvider for RemoteStorage {
    fn tier(&self) -> StorageTier {
        StorageTier::Remote
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        self.op
            .write(path, data)
            .await
            .map(|_| ())
            .map_err(|e| Error::storage_write(StorageTier::Remote, path, e))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.op
            .delete(path)
            .await
            .map_err(|e| Error::internal(format!("remote delete of {} failed: {}", path, e)))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let (dir, name_part) = match prefix.rfind('/') {
            Some(idx) => (&prefix[..=idx], &prefix[idx + 1..]),
            None => ("", prefix),
        };
        let entries = self
            .op
            .list(dir)
            .await
            .map_err(|e| Error::internal(format!("remote list of {} failed: {}", prefix, e)))?;

        let mut paths: Vec<String> = entries
            .into_iter()
            .filter(|entry| entry.metadata().is_file())
            .map(|entry| entry.path().trim_start_matches('/').to_string())
            .filter(|path| path.starts_with(dir.trim_start_matches('/')))
            .filter(|path| {
                path.rsplit('/')
                    .next()
                    .is_some_and(|name| name.starts_with(name_part))
            })
            .collect();
        paths.sort();
        Ok(paths)
    }
}

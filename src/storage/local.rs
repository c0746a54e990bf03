//! Local filesystem tier rooted at the public HLS directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use castforge_common::{Error, Result, StorageTier};
use tokio::fs;

use super::StorageProvider;

/// Prefix for in-flight files. Listing skips them.
const PARTIAL_PREFIX: &str = ".partial-";

/// Filesystem provider. Writes land in a sibling temp file first and are
/// renamed into place.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative storage path, refusing anything that escapes the root.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut full = self.root.clone();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if part == ".." || part == "." {
                return Err(Error::internal(format!("invalid storage path: {}", path)));
            }
            full.push(part);
        }
        Ok(full)
    }
}

#[async_trait]
impl StorageProvider for LocalStorage {
    fn tier(&self) -> StorageTier {
        StorageTier::Local
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        let target = self.resolve(path)?;
        let fail = |e: std::io::Error| Error::storage_write(StorageTier::Local, path, e);

        let parent = target
            .parent()
            .ok_or_else(|| Error::storage_write(StorageTier::Local, path, "no parent directory"))?;
        fs::create_dir_all(parent).await.map_err(fail)?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = parent.join(format!("{}{}", PARTIAL_PREFIX, file_name));

        fs::write(&temp, &data).await.map_err(fail)?;
        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(fail(e));
        }

        tracing::trace!("Wrote {:?} ({} bytes)", target, data.len());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        match fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let (dir_part, name_part) = match prefix.rfind('/') {
            Some(idx) => (&prefix[..idx], &prefix[idx + 1..]),
            None => ("", prefix),
        };
        let dir = self.resolve(dir_part)?;

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(PARTIAL_PREFIX) || !name.starts_with(name_part) {
                continue;
            }
            if dir_part.is_empty() {
                paths.push(name);
            } else {
                paths.push(format!("{}/{}", dir_part, name));
            }
        }
        paths.sort();
        Ok(paths)
    }
}

//! In-memory provider with write-failure and stall injection.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use castforge_common::{Error, Result, StorageTier};
use parking_lot::Mutex;

use super::StorageProvider;

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, Bytes>,
    write_log: Vec<String>,
    fail_matching: Vec<String>,
    stall_matching: Vec<String>,
}

/// Map-backed provider. Writes whose path contains a registered pattern fail
/// with [`Error::StorageWriteFailed`] or never complete.
#[derive(Clone)]
pub struct MemoryStorage {
    tier: StorageTier,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStorage {
    pub fn new(tier: StorageTier) -> Self {
        Self {
            tier,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Make every later write to a path containing `pattern` fail.
    pub fn fail_writes_containing(&self, pattern: impl Into<String>) {
        self.inner.lock().fail_matching.push(pattern.into());
    }

    /// Make every later write to a path containing `pattern` hang.
    pub fn stall_writes_containing(&self, pattern: impl Into<String>) {
        self.inner.lock().stall_matching.push(pattern.into());
    }

    pub fn clear_failures(&self) {
        let mut inner = self.inner.lock();
        inner.fail_matching.clear();
        inner.stall_matching.clear();
    }

    pub fn get(&self, path: &str) -> Option<Bytes> {
        self.inner.lock().objects.get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.inner.lock().objects.contains_key(path)
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.inner.lock().objects.keys().cloned().collect()
    }

    /// Paths of successful writes in the order they happened.
    pub fn write_log(&self) -> Vec<String> {
        self.inner.lock().write_log.clone()
    }
}

#[async_trait]
impl StorageProvider for MemoryStorage {
    fn tier(&self) -> StorageTier {
        self.tier
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        let stalled = {
            let inner = self.inner.lock();
            inner.stall_matching.iter().any(|p| path.contains(p.as_str()))
        };
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut inner = self.inner.lock();
        if inner.fail_matching.iter().any(|p| path.contains(p.as_str())) {
            return Err(Error::storage_write(self.tier, path, "injected failure"));
        }
        inner.objects.insert(path.to_string(), data);
        inner.write_log.push(path.to_string());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.inner.lock().objects.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

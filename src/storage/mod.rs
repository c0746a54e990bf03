//! Storage providers for published HLS artifacts.
//!
//! Every tier is reached through the same small capability set
//! ([`StorageProvider`]): write, delete and list. Which providers are active
//! comes from `[storage]` in the config:
//!
//! - [`LocalStorage`]: the public HLS directory, always present
//! - [`RemoteStorage`]: an object store reached through OpenDAL
//! - [`MemoryStorage`]: in-process map with failure injection, for tests

mod local;
mod memory;
mod remote;

pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use remote::RemoteStorage;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use castforge_common::{Result, StorageTier};
use serde::Serialize;

/// Capability set the segment pipeline needs from a storage tier.
///
/// Paths are `/`-separated and relative to the provider's root, e.g.
/// `0/live-1a2b3c4d-00042.ts`.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Which tier this provider serves.
    fn tier(&self) -> StorageTier;

    /// Store `data` at `path`, replacing any previous object.
    ///
    /// Readers never observe a partially written object.
    async fn write(&self, path: &str, data: Bytes) -> Result<()>;

    /// Remove `path`. Deleting a missing object succeeds.
    async fn delete(&self, path: &str) -> Result<()>;

    /// List object paths starting with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// The set of tiers segments can be routed to.
#[derive(Clone)]
pub struct StorageTiers {
    pub local: Arc<dyn StorageProvider>,
    pub remote: Option<Arc<dyn StorageProvider>>,
    pub stats: Arc<StorageStats>,
}

impl StorageTiers {
    pub fn new(local: Arc<dyn StorageProvider>, remote: Option<Arc<dyn StorageProvider>>) -> Self {
        Self {
            local,
            remote,
            stats: Arc::new(StorageStats::default()),
        }
    }

    /// Provider for `tier`, if configured.
    pub fn get(&self, tier: StorageTier) -> Option<&Arc<dyn StorageProvider>> {
        match tier {
            StorageTier::Local => Some(&self.local),
            StorageTier::Remote => self.remote.as_ref(),
        }
    }
}

/// Running counters for storage activity.
#[derive(Debug, Default)]
pub struct StorageStats {
    local_writes: AtomicU64,
    remote_writes: AtomicU64,
    remote_failures: AtomicU64,
    local_failures: AtomicU64,
    deletions: AtomicU64,
    delete_failures: AtomicU64,
}

/// Point-in-time copy of [`StorageStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageStatsSnapshot {
    pub local_writes: u64,
    pub remote_writes: u64,
    pub remote_failures: u64,
    pub local_failures: u64,
    pub deletions: u64,
    pub delete_failures: u64,
}

impl StorageStats {
    pub fn record_write(&self, tier: StorageTier) {
        match tier {
            StorageTier::Local => self.local_writes.fetch_add(1, Ordering::Relaxed),
            StorageTier::Remote => self.remote_writes.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_write_failure(&self, tier: StorageTier) {
        match tier {
            StorageTier::Local => self.local_failures.fetch_add(1, Ordering::Relaxed),
            StorageTier::Remote => self.remote_failures.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_delete(&self, ok: bool) {
        if ok {
            self.deletions.fetch_add(1, Ordering::Relaxed);
        } else {
            self.delete_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StorageStatsSnapshot {
        StorageStatsSnapshot {
            local_writes: self.local_writes.load(Ordering::Relaxed),
            remote_writes: self.remote_writes.load(Ordering::Relaxed),
            remote_failures: self.remote_failures.load(Ordering::Relaxed),
            local_failures: self.local_failures.load(Ordering::Relaxed),
            deletions: self.deletions.load(Ordering::Relaxed),
            delete_failures: self.delete_failures.load(Ordering::Relaxed),
        }
    }
}

//! Segment placement and retention rules.

use std::time::Duration;

use castforge_common::{Placement, StorageTier};

use crate::config::{RetentionConfig, StorageConfig};

/// Decides where segments live and when each tier lets go of them.
///
/// Pure: the answer depends only on configuration, segment age and sequence
/// numbers, never on the filesystem.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingPolicy {
    remote_enabled: bool,
    keep_local: bool,
    local: RetentionConfig,
    remote: RetentionConfig,
}

impl RoutingPolicy {
    pub fn new(
        remote_enabled: bool,
        keep_local: bool,
        local: RetentionConfig,
        remote: RetentionConfig,
    ) -> Self {
        Self {
            remote_enabled,
            keep_local,
            local,
            remote,
        }
    }

    pub fn from_config(storage: &StorageConfig) -> Self {
        Self::new(
            storage.provider.is_remote(),
            storage.keep_local_copy,
            storage.local_retention,
            storage.remote_retention,
        )
    }

    /// Tiers a newly arrived segment of `age` should be written to.
    ///
    /// A tier whose age window the segment has already outlived is skipped.
    /// When that leaves nothing, the segment stays local.
    pub fn place(&self, age: Duration) -> Placement {
        let remote = self.remote_enabled && !exceeds(age, &self.remote);
        let local = (!self.remote_enabled || self.keep_local) && !exceeds(age, &self.local);

        Placement::from_tiers(local, remote).unwrap_or(Placement::Local)
    }

    /// Whether `tier` may drop segment `sequence` given the newest sequence
    /// in the same track.
    pub fn expired(&self, tier: StorageTier, sequence: u64, newest: u64, age: Duration) -> bool {
        let window = self.retention(tier);
        newest.saturating_sub(sequence) >= window.max_segments || exceeds(age, window)
    }

    pub fn retention(&self, tier: StorageTier) -> &RetentionConfig {
        match tier {
            StorageTier::Local => &self.local,
            StorageTier::Remote => &self.remote,
        }
    }
}

fn exceeds(age: Duration, window: &RetentionConfig) -> bool {
    age > Duration::from_secs(window.max_age_secs)
}

//! Per-tier retention.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{RoutingPolicy, SegmentStore};
use crate::storage::StorageTiers;

/// Deletes segments that fell out of a tier's retention window.
///
/// Expired copies are taken out of the catalog under its lock, then deleted
/// without holding it.
#[derive(Clone)]
pub struct Pruner {
    store: Arc<SegmentStore>,
    tiers: StorageTiers,
    policy: RoutingPolicy,
}

impl Pruner {
    pub fn new(store: Arc<SegmentStore>, tiers: StorageTiers, policy: RoutingPolicy) -> Self {
        Self {
            store,
            tiers,
            policy,
        }
    }

    /// One pass. Returns how many tier copies were deleted.
    pub async fn prune_once(&self, now: SystemTime) -> usize {
        let expired = self.store.take_expired(&self.policy, now);
        let mut deleted = 0;

        for item in expired {
            let Some(provider) = self.tiers.get(item.tier) else {
                continue;
            };
            match provider.delete(&item.key).await {
                Ok(()) => {
                    self.tiers.stats.record_delete(true);
                    deleted += 1;
                }
                Err(e) => {
                    self.tiers.stats.record_delete(false);
                    tracing::warn!(tier = %item.tier, path = %item.key, "Failed to prune segment: {}", e);
                }
            }
        }

        if deleted > 0 {
            tracing::debug!("Pruned {} segment copies", deleted);
        }
        deleted
    }

    pub fn spawn(self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.prune_once(SystemTime::now()).await;
                    }
                }
            }
        })
    }
}

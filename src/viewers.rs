//! Viewer presence tracking.
//!
//! Players ping periodically; a client counts as active while its last ping
//! is within the expiry window. Expired records are evicted lazily when
//! counting and by a periodic sweep.

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Last-seen liveness signal from one client.
#[derive(Debug, Clone, Copy)]
pub struct ViewerRecord {
    pub first_seen: Instant,
    pub last_ping: Instant,
}

/// Thread-safe presence tracker.
#[derive(Clone)]
pub struct ViewerTracker {
    records: Arc<DashMap<String, ViewerRecord>>,
    expiry: Duration,
}

impl ViewerTracker {
    pub fn new(expiry: Duration) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            expiry,
        }
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Upsert the ping timestamp for `client_id`.
    pub fn record_ping(&self, client_id: &str) {
        self.record_ping_at(client_id, Instant::now());
    }

    pub fn record_ping_at(&self, client_id: &str, now: Instant) {
        self.records
            .entry(client_id.to_string())
            .and_modify(|r| r.last_ping = now)
            .or_insert_with(|| {
                tracing::debug!(client_id = %client_id, "New viewer");
                ViewerRecord {
                    first_seen: now,
                    last_ping: now,
                }
            });
    }

    /// Number of clients pinged within the expiry window.
    pub fn active_count(&self) -> usize {
        self.active_count_at(Instant::now())
    }

    pub fn active_count_at(&self, now: Instant) -> usize {
        let mut active = 0;
        self.records.retain(|_, record| {
            let alive = self.is_alive(record, now);
            if alive {
                active += 1;
            }
            alive
        });
        active
    }

    pub fn get(&self, client_id: &str) -> Option<ViewerRecord> {
        self.records.get(client_id).map(|r| *r)
    }

    /// Drop expired records. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| self.is_alive(record, now));
        let removed = before.saturating_sub(self.records.len());
        if removed > 0 {
            tracing::debug!(removed = removed, "Swept expired viewers");
        }
        removed
    }

    /// Records held, including ones not yet evicted.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn is_alive(&self, record: &ViewerRecord, now: Instant) -> bool {
        now.saturating_duration_since(record.last_ping) <= self.expiry
    }
}

impl Default for ViewerTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

/// Derive an opaque client id from what a request exposes.
///
/// Any input is accepted; missing parts simply contribute nothing.
pub fn client_id(ip: Option<IpAddr>, user_agent: Option<&str>) -> String {
    let ip = ip.map(|ip| ip.to_string()).unwrap_or_default();
    format!("{}|{}", ip, user_agent.unwrap_or_default())
}

/// Spawn the periodic sweep.
pub fn start_sweep_task(tracker: ViewerTracker, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            tracker.sweep();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: Duration = Duration::from_secs(60);
    const EPS: Duration = Duration::from_millis(1);

    #[test]
    fn ping_counts_until_window_elapses() {
        let tracker = ViewerTracker::new(W);
        let t0 = Instant::now();
        tracker.record_ping_at("a", t0);

        assert_eq!(tracker.active_count_at(t0), 1);
        assert_eq!(tracker.active_count_at(t0 + W - EPS), 1);
        assert_eq!(tracker.active_count_at(t0 + W + EPS), 0);
    }

    #[test]
    fn repeat_pings_refresh() {
        let tracker = ViewerTracker::new(W);
        let t0 = Instant::now();
        tracker.record_ping_at("a", t0);
        tracker.record_ping_at("a", t0 + Duration::from_secs(50));

        assert_eq!(tracker.active_count_at(t0 + Duration::from_secs(100)), 1);
        let record = tracker.get("a").unwrap();
        assert_eq!(record.first_seen, t0);
    }

    #[test]
    fn distinct_clients_counted_once() {
        let tracker = ViewerTracker::new(W);
        let t0 = Instant::now();
        for id in ["a", "b", "a", "c", "b"] {
            tracker.record_ping_at(id, t0);
        }
        assert_eq!(tracker.active_count_at(t0), 3);
    }

    #[test]
    fn counting_evicts_expired() {
        let tracker = ViewerTracker::new(W);
        let t0 = Instant::now();
        tracker.record_ping_at("old", t0);
        tracker.record_ping_at("new", t0 + Duration::from_secs(30));

        assert_eq!(tracker.active_count_at(t0 + W + EPS), 1);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.get("old").is_none());
    }

    #[test]
    fn sweep_removes_expired() {
        let tracker = ViewerTracker::new(W);
        let t0 = Instant::now();
        tracker.record_ping_at("a", t0);
        tracker.record_ping_at("b", t0);

        assert_eq!(tracker.sweep_at(t0 + W - EPS), 0);
        assert_eq!(tracker.sweep_at(t0 + W + EPS), 2);
        assert!(tracker.is_empty());
    }

    #[test]
    fn empty_client_id_is_a_record() {
        let tracker = ViewerTracker::new(W);
        tracker.record_ping(&client_id(None, None));
        assert_eq!(tracker.active_count(), 1);
    }

    #[test]
    fn client_id_combines_ip_and_agent() {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let a = client_id(Some(ip), Some("VLC/3.0"));
        let b = client_id(Some(ip), Some("mpv"));
        assert_ne!(a, b);
        assert_eq!(a, client_id(Some(ip), Some("VLC/3.0")));
    }

    #[tokio::test]
    async fn sweep_task_runs() {
        let tracker = ViewerTracker::new(Duration::from_millis(10));
        tracker.record_ping("a");

        let handle = start_sweep_task(tracker.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(tracker.is_empty());
        handle.abort();
    }
}

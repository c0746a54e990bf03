//! Shared test harness for integration tests.
//!
//! Provides [`TestRuntime`], a fully wired [`Runtime`] running against a
//! [`MemoryLauncher`] and a temporary data directory, plus helpers for
//! faking broadcasters and waiting on stream state.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use castforge::config::{Config, RetentionConfig, StorageProviderConfig};
use castforge::gate::BroadcastConnection;
use castforge::runtime::Runtime;
use castforge::state::{StatusSnapshot, StreamState};
use castforge::storage::{MemoryStorage, StorageProvider};
use castforge::transcoder::{MediaSource, MemoryLauncher};
use castforge_common::{SessionId, StorageTier};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const WAIT: Duration = Duration::from_secs(5);

/// Admin bearer token configured by [`test_config`].
pub const ADMIN_TOKEN: &str = "test-admin-token";

/// Config pointing every path into `root`, with background timers slowed
/// down so tests drive them explicitly.
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.paths.data_dir = root.join("data");
    config.paths.hls_dir = root.join("data").join("hls");
    config.paths.offline_asset = root.join("offline.ts");
    config.paths.logo = None;
    config.ingest.host = "127.0.0.1".to_string();
    config.ingest.port = 0;
    config.transcoder.stop_grace_secs = 1;
    config.storage.prune_interval_secs = 3600;
    config.viewers.sweep_interval_secs = 3600;
    config.server.admin_token = Some(ADMIN_TOKEN.to_string());
    config
}

/// Config with a remote object store that does not keep local copies.
pub fn remote_config(root: &Path) -> Config {
    let mut config = test_config(root);
    config.storage.provider = StorageProviderConfig::S3 {
        bucket: "castforge-test".to_string(),
        root: "/".to_string(),
        region: None,
        endpoint: None,
        access_key_id: None,
        secret_access_key: None,
        enable_virtual_host_style: false,
    };
    config.storage.keep_local_copy = false;
    config.storage.public_url = Some("https://cdn.example.com/live".to_string());
    config.storage.remote_retention = RetentionConfig {
        max_segments: 100,
        max_age_secs: 3600,
    };
    config
}

pub struct TestRuntime {
    pub runtime: Runtime,
    pub launcher: MemoryLauncher,
    pub remote: Option<MemoryStorage>,
    pub dir: TempDir,
}

impl TestRuntime {
    pub async fn start() -> Self {
        Self::with_config(test_config).await
    }

    pub async fn with_config(make: impl FnOnce(&Path) -> Config) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let config = make(dir.path());

        let remote = config
            .storage
            .provider
            .is_remote()
            .then(|| MemoryStorage::new(StorageTier::Remote));
        let launcher = MemoryLauncher::new();

        let runtime = Runtime::start(
            config,
            Arc::new(launcher.clone()),
            remote
                .clone()
                .map(|r| Arc::new(r) as Arc<dyn StorageProvider>),
        )
        .await
        .expect("runtime failed to start");

        Self {
            runtime,
            launcher,
            remote,
            dir,
        }
    }

    pub fn state(&self) -> &Arc<StreamState> {
        &self.runtime.state
    }

    pub fn hls_dir(&self) -> &Path {
        &self.runtime.config.paths.hls_dir
    }

    /// Offer a new broadcaster to the gate.
    pub fn connect(&self) -> FakeBroadcaster {
        let (conn, broadcaster) = fake_connection();
        let accepted = self.runtime.gate.accept(conn).is_ok();
        FakeBroadcaster {
            accepted,
            ..broadcaster
        }
    }
}

/// The broadcaster side of a [`BroadcastConnection`].
pub struct FakeBroadcaster {
    pub session_id: SessionId,
    pub media: mpsc::Sender<Bytes>,
    pub close: CancellationToken,
    pub accepted: bool,
}

pub fn fake_connection() -> (BroadcastConnection, FakeBroadcaster) {
    let remote_addr: SocketAddr = "198.51.100.20:41000".parse().unwrap();
    let (media, source) = MediaSource::channel(16, Some(remote_addr));
    let close = CancellationToken::new();
    let session_id = SessionId::new();

    let conn = BroadcastConnection {
        session_id,
        remote_addr,
        source,
        close: close.clone(),
    };
    let broadcaster = FakeBroadcaster {
        session_id,
        media,
        close,
        accepted: false,
    };
    (conn, broadcaster)
}

/// Wait until the stream state satisfies `pred`.
pub async fn wait_for_state(
    state: &StreamState,
    pred: impl FnMut(&StatusSnapshot) -> bool,
) -> StatusSnapshot {
    let mut rx = state.watch();
    let result = tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for stream state")
        .expect("state channel closed");
    result.clone()
}

/// Poll `check` until it holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

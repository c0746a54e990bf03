//! Online/offline transitions.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use castforge_common::{Error, JobId, Result, SessionId, StreamIdentifier};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{Broadcaster, EventBus, EventPayload, OfflineReason, StreamState, StreamStatus};
use crate::config::PathsConfig;
use crate::transcoder::{MediaSource, Supervisor, TranscodeInput, TranscodeJob};

/// An accepted broadcast asking to go live.
#[derive(Debug)]
pub struct OnlineRequest {
    pub session_id: SessionId,
    pub remote_addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
    pub source: MediaSource,
}

/// Drives [`StreamState`] between offline filler and live content.
///
/// Transitions hold one lock for their whole duration, so a second request
/// waits in `Transitioning` until the first completes.
pub struct StateMachine {
    state: Arc<StreamState>,
    supervisor: Arc<Supervisor>,
    events: Arc<EventBus>,
    paths: PathsConfig,
    lock: Mutex<()>,
}

impl StateMachine {
    pub fn new(
        state: Arc<StreamState>,
        supervisor: Arc<Supervisor>,
        events: Arc<EventBus>,
        paths: PathsConfig,
    ) -> Self {
        Self {
            state,
            supervisor,
            events,
            paths,
            lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> &Arc<StreamState> {
        &self.state
    }

    /// Offline → Online.
    ///
    /// If the live transcoder cannot start, the stream falls back to the
    /// offline filler and the failure is returned so the caller can end the
    /// session.
    pub async fn go_online(&self, request: OnlineRequest) -> Result<()> {
        let _guard = self.lock.lock().await;

        if self.state.is_online() {
            tracing::debug!(session_id = %request.session_id, "Already online");
            return Ok(());
        }

        tracing::info!(
            session_id = %request.session_id,
            remote_addr = %request.remote_addr,
            "Stream going online"
        );
        self.state.update(|s| s.status = StreamStatus::Transitioning);

        if let Some(stopped) = self.supervisor.stop_identifier(StreamIdentifier::Offline).await {
            tracing::debug!(job_id = %stopped.id, "Offline filler stopped");
        }

        let started = match self.live_job(request.source).await {
            Ok(job) => self.supervisor.start(job).await,
            Err(e) => Err(Error::transcode_failed(StreamIdentifier::Live, e.to_string())),
        };

        let info = match started {
            Ok(info) => info,
            Err(e) => {
                tracing::error!(session_id = %request.session_id, "Live transcoder did not start: {}", e);
                self.events.broadcast(EventPayload::TranscodeFailed {
                    job_id: None,
                    identifier: StreamIdentifier::Live,
                    reason: e.to_string(),
                });
                self.enter_offline(OfflineReason::TranscodeFailed).await;
                return Err(e);
            }
        };

        remove_artifact(&self.paths.thumbnail(), "thumbnail").await;

        let broadcaster = Broadcaster {
            session_id: request.session_id,
            remote_addr: request.remote_addr,
            connected_at: request.connected_at,
        };
        self.state.update(|s| {
            s.status = StreamStatus::Online;
            s.broadcaster = Some(broadcaster);
            s.last_transition = Some(Utc::now());
            s.live_job = Some(info.id);
            s.offline_job = None;
        });

        self.events.broadcast(EventPayload::StreamStarted {
            session_id: request.session_id,
            remote_addr: request.remote_addr,
        });
        self.events.broadcast(EventPayload::TransitionCompleted {
            status: StreamStatus::Online,
        });
        tracing::info!(session_id = %request.session_id, job_id = %info.id, "Stream online");
        Ok(())
    }

    /// Online → Offline, also used at startup.
    ///
    /// A no-op when already offline with the filler running.
    pub async fn go_offline(&self, reason: OfflineReason) {
        let _guard = self.lock.lock().await;

        if self.state.snapshot().is_settled_offline() {
            tracing::debug!(reason = ?reason, "Already offline");
            return;
        }

        self.enter_offline(reason).await;
    }

    /// Caller holds the transition lock.
    async fn enter_offline(&self, reason: OfflineReason) {
        let previous = self.state.snapshot();
        tracing::info!(reason = ?reason, "Stream going offline");
        self.state.update(|s| s.status = StreamStatus::Transitioning);

        if let Some(stopped) = self.supervisor.stop_identifier(StreamIdentifier::Live).await {
            tracing::debug!(job_id = %stopped.id, "Live transcoder stopped");
        }

        let offline_job = self.start_filler().await;

        remove_artifact(&self.paths.preview(), "preview").await;

        self.state.update(|s| {
            s.status = StreamStatus::Offline;
            s.broadcaster = None;
            s.last_transition = Some(Utc::now());
            s.live_job = None;
            s.offline_job = offline_job;
        });

        if let Some(broadcaster) = previous.broadcaster {
            self.events.broadcast(EventPayload::StreamStopped {
                session_id: Some(broadcaster.session_id),
                reason,
            });
        }
        self.events.broadcast(EventPayload::TransitionCompleted {
            status: StreamStatus::Offline,
        });
        tracing::info!("Stream offline");
    }

    /// Relaunch the offline filler after `failed` died on its own.
    ///
    /// Does nothing unless the stream is still offline on that job. If the
    /// relaunch fails the stream is left unsettled, so the next offline
    /// transition tries again.
    pub async fn restart_filler(&self, failed: JobId) {
        let _guard = self.lock.lock().await;

        let snapshot = self.state.snapshot();
        if snapshot.status != StreamStatus::Offline || snapshot.offline_job != Some(failed) {
            tracing::debug!(job_id = %failed, "Filler already replaced");
            return;
        }

        tracing::warn!(job_id = %failed, "Offline filler died, relaunching");
        let offline_job = self.start_filler().await;
        self.state.update(|s| s.offline_job = offline_job);
    }

    /// Caller holds the transition lock.
    async fn start_filler(&self) -> Option<JobId> {
        let job = match self.offline_job().await {
            Ok(job) => job,
            Err(e) => {
                tracing::error!("Could not prepare offline filler output: {}", e);
                return None;
            }
        };
        match self.supervisor.start(job).await {
            Ok(info) => Some(info.id),
            Err(e) => {
                tracing::error!("Offline filler did not start: {}", e);
                self.events.broadcast(EventPayload::TranscodeFailed {
                    job_id: None,
                    identifier: StreamIdentifier::Offline,
                    reason: e.to_string(),
                });
                None
            }
        }
    }

    async fn live_job(&self, source: MediaSource) -> std::io::Result<TranscodeJob> {
        let dir = self.output_dir(StreamIdentifier::Live);
        reset_dir(&dir).await?;
        Ok(TranscodeJob::new(
            StreamIdentifier::Live,
            TranscodeInput::Stream(source),
            dir,
        ))
    }

    async fn offline_job(&self) -> std::io::Result<TranscodeJob> {
        let dir = self.output_dir(StreamIdentifier::Offline);
        reset_dir(&dir).await?;

        let asset = &self.paths.offline_asset;
        let input = if tokio::fs::try_exists(asset).await.unwrap_or(false) {
            TranscodeInput::File(asset.clone())
        } else {
            tracing::debug!("Offline asset {:?} missing, using generated filler", asset);
            TranscodeInput::Generated
        };
        Ok(TranscodeJob::new(StreamIdentifier::Offline, input, dir))
    }

    fn output_dir(&self, identifier: StreamIdentifier) -> PathBuf {
        self.paths.work_dir().join(identifier.as_str())
    }
}

/// Empty `dir`. The previous job for this identifier has already stopped.
async fn reset_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tokio::fs::create_dir_all(dir).await
}

/// Best-effort removal; failure is only logged.
async fn remove_artifact(path: &Path, what: &str) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed stale {} {:?}", what, path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {} {:?}: {}", what, path, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcoder::{MemoryLauncher, SimulatedState};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        paths: PathsConfig,
        launcher: MemoryLauncher,
        machine: StateMachine,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let paths = PathsConfig {
            data_dir: dir.path().to_path_buf(),
            hls_dir: dir.path().join("hls"),
            offline_asset: dir.path().join("missing.ts"),
            logo: None,
        };
        let launcher = MemoryLauncher::new();
        let supervisor = Arc::new(Supervisor::new(
            Arc::new(launcher.clone()),
            Duration::from_millis(100),
        ));
        let machine = StateMachine::new(
            Arc::new(StreamState::new()),
            supervisor,
            Arc::new(EventBus::default()),
            paths.clone(),
        );
        Fixture {
            _dir: dir,
            paths,
            launcher,
            machine,
        }
    }

    fn request() -> OnlineRequest {
        let (_tx, source) = MediaSource::channel(4, None);
        OnlineRequest {
            session_id: SessionId::new(),
            remote_addr: "127.0.0.1:40000".parse().unwrap(),
            connected_at: Utc::now(),
            source,
        }
    }

    #[tokio::test]
    async fn startup_enters_offline_with_filler() {
        let f = fixture();
        f.machine.go_offline(OfflineReason::Startup).await;

        let snap = f.machine.state().snapshot();
        assert!(snap.is_settled_offline());
        let running = f.launcher.running();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].identifier, StreamIdentifier::Offline);
        assert_eq!(running[0].input, "generated");
    }

    #[tokio::test]
    async fn offline_asset_used_when_present() {
        let f = fixture();
        std::fs::write(&f.paths.offline_asset, b"ts").unwrap();
        f.machine.go_offline(OfflineReason::Startup).await;

        assert!(f.launcher.running()[0].input.starts_with("file "));
    }

    #[tokio::test]
    async fn online_swaps_filler_for_live() {
        let f = fixture();
        f.machine.go_offline(OfflineReason::Startup).await;
        let filler = f.launcher.last().unwrap();

        std::fs::write(f.paths.thumbnail(), b"jpg").unwrap();
        f.machine.go_online(request()).await.unwrap();

        assert_eq!(filler.state(), SimulatedState::Terminated);
        let running = f.launcher.running();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].identifier, StreamIdentifier::Live);

        let snap = f.machine.state().snapshot();
        assert_eq!(snap.status, StreamStatus::Online);
        assert!(snap.broadcaster.is_some());
        assert_eq!(snap.live_job, Some(running[0].id));
        assert!(!f.paths.thumbnail().exists());
    }

    #[tokio::test]
    async fn offline_again_is_noop() {
        let f = fixture();
        f.machine.go_offline(OfflineReason::Startup).await;
        f.machine.go_offline(OfflineReason::Disconnected).await;
        assert_eq!(f.launcher.launched().len(), 1);
    }

    #[tokio::test]
    async fn round_trip_restores_offline_shape() {
        let f = fixture();
        f.machine.go_offline(OfflineReason::Startup).await;
        let boot = f.machine.state().snapshot();

        std::fs::write(f.paths.preview(), b"gif").unwrap();
        f.machine.go_online(request()).await.unwrap();
        f.machine.go_offline(OfflineReason::Disconnected).await;
        let after = f.machine.state().snapshot();

        assert_eq!(after.status, boot.status);
        assert_eq!(after.broadcaster, boot.broadcaster);
        assert_eq!(after.live_job, None);
        assert!(after.offline_job.is_some());
        assert_ne!(after.offline_job, boot.offline_job);
        assert!(!f.paths.preview().exists());

        let running = f.launcher.running();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].identifier, StreamIdentifier::Offline);
    }

    #[tokio::test]
    async fn live_launch_failure_falls_back_to_filler() {
        let f = fixture();
        f.machine.go_offline(OfflineReason::Startup).await;

        f.launcher.fail_next_launch();
        let err = f.machine.go_online(request()).await.unwrap_err();
        assert!(matches!(err, Error::TranscodeFailed { .. }));

        let snap = f.machine.state().snapshot();
        assert!(snap.is_settled_offline());
        assert_eq!(f.launcher.running()[0].identifier, StreamIdentifier::Offline);
    }

    #[tokio::test]
    async fn filler_failure_is_logged_only() {
        let f = fixture();
        f.launcher.fail_next_launch();
        f.machine.go_offline(OfflineReason::Startup).await;

        let snap = f.machine.state().snapshot();
        assert_eq!(snap.status, StreamStatus::Offline);
        assert!(snap.offline_job.is_none());
        assert!(f.launcher.running().is_empty());
    }

    #[tokio::test]
    async fn dead_filler_is_relaunched() {
        let f = fixture();
        f.machine.go_offline(OfflineReason::Startup).await;
        let dead = f.launcher.last().unwrap();
        dead.exit(1);

        f.machine.restart_filler(dead.job().id).await;

        let snap = f.machine.state().snapshot();
        assert!(snap.is_settled_offline());
        assert_ne!(snap.offline_job, Some(dead.job().id));
        let running = f.launcher.running();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].identifier, StreamIdentifier::Offline);
    }

    #[tokio::test]
    async fn filler_relaunch_skipped_once_replaced() {
        let f = fixture();
        f.machine.go_offline(OfflineReason::Startup).await;
        let old = f.launcher.last().unwrap().job().id;
        f.machine.go_online(request()).await.unwrap();

        f.machine.restart_filler(old).await;

        assert_eq!(f.machine.state().status(), StreamStatus::Online);
        assert_eq!(f.launcher.launched().len(), 2);
    }

    #[tokio::test]
    async fn failed_filler_relaunch_leaves_offline_unsettled() {
        let f = fixture();
        f.machine.go_offline(OfflineReason::Startup).await;
        let dead = f.launcher.last().unwrap();
        dead.exit(1);

        f.launcher.fail_next_launch();
        f.machine.restart_filler(dead.job().id).await;
        assert!(!f.machine.state().snapshot().is_settled_offline());

        // The next offline request retries.
        f.machine.go_offline(OfflineReason::Disconnected).await;
        assert!(f.machine.state().snapshot().is_settled_offline());
    }

    #[tokio::test]
    async fn concurrent_requests_serialize() {
        let f = fixture();
        let machine = Arc::new(f.machine);
        machine.go_offline(OfflineReason::Startup).await;

        let a = {
            let m = machine.clone();
            tokio::spawn(async move { m.go_online(request()).await })
        };
        let b = {
            let m = machine.clone();
            tokio::spawn(async move { m.go_online(request()).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let live: Vec<_> = f
            .launcher
            .running()
            .into_iter()
            .filter(|j| j.identifier == StreamIdentifier::Live)
            .collect();
        assert_eq!(live.len(), 1);
        assert_eq!(machine.state().status(), StreamStatus::Online);
    }
}

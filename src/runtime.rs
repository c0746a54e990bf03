//! Startup orchestration.
//!
//! [`Runtime::start`] brings the broadcast core up in a fixed order:
//!
//! 1. reset the HLS and transcoder work directories and populate defaults
//! 2. set up the storage tiers and their counters
//! 3. wire the gate, state machine, supervisor and segment pipeline
//! 4. enter the offline state through the regular offline transition
//!
//! after which the gate is open for broadcasters.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use castforge_common::JobId;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, PathsConfig};
use crate::gate::{run_transitions, SessionGate};
use crate::ingest::{run_gate_events, IngestListener};
use crate::segments::{ArtifactWatcher, Pruner, ReceiverInput, RoutingPolicy, SegmentReceiver, SegmentStore};
use crate::state::{EventBus, EventPayload, OfflineReason, StateMachine, StreamState};
use crate::storage::{LocalStorage, RemoteStorage, StorageProvider, StorageTiers};
use crate::transcoder::{FfmpegLauncher, ProcessLauncher, Supervisor, SupervisorEvent};
use crate::viewers::{start_sweep_task, ViewerTracker};

/// Artifacts buffered between the watchers and the segment receiver.
const RECEIVER_CAPACITY: usize = 1024;

/// Pause before relaunching an offline filler that died.
const FILLER_RESTART_DELAY: Duration = Duration::from_millis(500);

/// Everything the broadcast core needs at runtime, wired together.
pub struct Runtime {
    pub config: Arc<Config>,
    pub gate: Arc<SessionGate>,
    pub machine: Arc<StateMachine>,
    pub state: Arc<StreamState>,
    pub supervisor: Arc<Supervisor>,
    pub events: Arc<EventBus>,
    pub viewers: ViewerTracker,
    pub tiers: StorageTiers,
    pub segments: Arc<SegmentStore>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Start with ffmpeg and the configured storage provider.
    pub async fn launch(config: Config) -> Result<Self> {
        let launcher = FfmpegLauncher::new(&config.transcoder)?;
        tracing::info!("Using ffmpeg at {:?}", launcher.binary());

        let remote = match RemoteStorage::from_config(&config.storage.provider)
            .context("Failed to configure remote storage")?
        {
            Some(remote) => {
                remote.check().await;
                Some(Arc::new(remote) as Arc<dyn StorageProvider>)
            }
            None => None,
        };

        Self::start(config, Arc::new(launcher), remote).await
    }

    /// Start with an explicit launcher and remote tier.
    pub async fn start(
        config: Config,
        launcher: Arc<dyn ProcessLauncher>,
        remote: Option<Arc<dyn StorageProvider>>,
    ) -> Result<Self> {
        prepare_directories(&config.paths).await?;

        let local: Arc<dyn StorageProvider> = Arc::new(LocalStorage::new(&config.paths.hls_dir));
        let tiers = StorageTiers::new(local, remote);
        tracing::info!(
            remote = tiers.remote.is_some(),
            keep_local = config.storage.keep_local_copy,
            "Storage ready"
        );

        let events = Arc::new(EventBus::default());
        let state = Arc::new(StreamState::new());
        let supervisor = Arc::new(Supervisor::new(
            launcher,
            Duration::from_secs(config.transcoder.stop_grace_secs),
        ));
        let machine = Arc::new(StateMachine::new(
            state.clone(),
            supervisor.clone(),
            events.clone(),
            config.paths.clone(),
        ));
        let (gate, requests) = SessionGate::new();
        let gate = Arc::new(gate);

        let shutdown = CancellationToken::new();
        let segments = Arc::new(SegmentStore::new());
        let policy = RoutingPolicy::from_config(&config.storage);
        let (receiver_tx, receiver_rx) = mpsc::channel(RECEIVER_CAPACITY);
        let viewers = ViewerTracker::new(Duration::from_secs(config.viewers.expiry_secs));

        let mut tasks = Vec::new();
        tasks.push(
            SegmentReceiver::new(tiers.clone(), policy.clone(), segments.clone(), events.clone())
                .with_public_url(config.storage.public_url.clone())
                .with_variants(config.transcoder.variants.clone())
                .with_remote_timeout(Duration::from_secs(config.storage.remote_write_timeout_secs))
                .spawn(receiver_rx, shutdown.child_token()),
        );
        tasks.push(
            Pruner::new(segments.clone(), tiers.clone(), policy).spawn(
                Duration::from_secs(config.storage.prune_interval_secs),
                shutdown.child_token(),
            ),
        );
        tasks.push(start_sweep_task(
            viewers.clone(),
            Duration::from_secs(config.viewers.sweep_interval_secs),
        ));
        tasks.push(tokio::spawn(route_supervisor_events(
            supervisor.subscribe(),
            receiver_tx,
            gate.clone(),
            machine.clone(),
            events.clone(),
            shutdown.child_token(),
        )));

        machine.go_offline(OfflineReason::Startup).await;
        tasks.push(tokio::spawn(run_transitions(
            gate.clone(),
            machine.clone(),
            requests,
        )));

        tracing::info!("Broadcast core started");
        Ok(Self {
            config: Arc::new(config),
            gate,
            machine,
            state,
            supervisor,
            events,
            viewers,
            tiers,
            segments,
            shutdown,
            tasks,
        })
    }

    /// Open the ingest listener. Returns the bound address.
    pub async fn serve_ingest(&mut self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.config.ingest.host, self.config.ingest.port);
        let listener = IngestListener::bind(&addr, self.config.ingest.read_buffer_bytes).await?;
        let local_addr = listener.local_addr()?;

        let (tx, rx) = mpsc::channel(16);
        self.tasks
            .push(tokio::spawn(listener.run(tx, self.shutdown.child_token())));
        self.tasks
            .push(tokio::spawn(run_gate_events(self.gate.clone(), rx)));
        Ok(local_addr)
    }

    /// Cancellation token that fires on shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop every transcoder and background task.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down broadcast core");
        // Ingest connections close through child tokens of this one.
        self.shutdown.cancel();
        for task in &self.tasks {
            task.abort();
        }
        self.supervisor.stop_all().await;
    }
}

/// Reset output directories and copy the default thumbnail into place.
async fn prepare_directories(paths: &PathsConfig) -> Result<()> {
    tokio::fs::create_dir_all(&paths.data_dir)
        .await
        .with_context(|| format!("Failed to create data directory {:?}", paths.data_dir))?;
    reset_dir(&paths.hls_dir).await?;
    reset_dir(&paths.work_dir()).await?;

    if let Some(logo) = &paths.logo {
        if tokio::fs::try_exists(logo).await.unwrap_or(false) {
            tokio::fs::copy(logo, paths.thumbnail())
                .await
                .with_context(|| format!("Failed to copy logo {:?}", logo))?;
        } else {
            tracing::warn!("Logo {:?} not found; no default thumbnail", logo);
        }
    }
    Ok(())
}

async fn reset_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("Failed to clear {:?}", dir)),
    }
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {:?}", dir))
}

/// Connect supervisor lifecycle to the segment pipeline. A dying live
/// transcoder ends the session it was serving; a dying offline filler is
/// relaunched.
async fn route_supervisor_events(
    mut supervisor_events: broadcast::Receiver<SupervisorEvent>,
    inputs: mpsc::Sender<ReceiverInput>,
    gate: Arc<SessionGate>,
    machine: Arc<StateMachine>,
    events: Arc<EventBus>,
    cancel: CancellationToken,
) {
    let mut watchers: HashMap<JobId, ArtifactWatcher> = HashMap::new();

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = supervisor_events.recv() => match event {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Missed {} supervisor events", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        match event {
            SupervisorEvent::Started(job) => {
                if inputs.send(ReceiverInput::JobStarted(job.clone())).await.is_err() {
                    break;
                }
                match ArtifactWatcher::spawn(&job, inputs.clone()) {
                    Ok(watcher) => {
                        watchers.insert(job.id, watcher);
                    }
                    Err(e) => tracing::error!(job_id = %job.id, "Cannot watch transcoder output: {:#}", e),
                }
            }
            SupervisorEvent::Stopped(job) => {
                watchers.remove(&job.id);
                let _ = inputs.send(ReceiverInput::JobEnded(job.id)).await;
            }
            ended => {
                let job = ended.job().clone();
                watchers.remove(&job.id);
                let _ = inputs.send(ReceiverInput::JobEnded(job.id)).await;

                let snapshot = machine.state().snapshot();
                if snapshot.offline_job == Some(job.id) {
                    let machine = machine.clone();
                    let cancel = cancel.clone();
                    let failed = job.id;
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            _ = tokio::time::sleep(FILLER_RESTART_DELAY) => machine.restart_filler(failed).await,
                        }
                    });
                }

                let SupervisorEvent::Failed { reason, .. } = ended else {
                    continue;
                };
                if snapshot.offline_job == Some(job.id) {
                    events.broadcast(EventPayload::TranscodeFailed {
                        job_id: Some(job.id),
                        identifier: job.identifier,
                        reason,
                    });
                    continue;
                }
                if snapshot.live_job != Some(job.id) {
                    continue;
                }
                // The session this job was serving, which may already be gone.
                let Some(broadcaster) = snapshot.broadcaster else {
                    continue;
                };

                events.broadcast(EventPayload::TranscodeFailed {
                    job_id: Some(job.id),
                    identifier: job.identifier,
                    reason,
                });
                if !gate.disconnect(broadcaster.session_id, OfflineReason::TranscodeFailed) {
                    tracing::debug!(
                        session_id = %broadcaster.session_id,
                        "Live transcoder failed after its session ended"
                    );
                }
            }
        }
    }
}

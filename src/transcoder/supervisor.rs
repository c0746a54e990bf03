//! Process supervisor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use castforge_common::{Error, JobId, Result, StreamIdentifier};
use tokio::sync::{broadcast, watch, Mutex};
use tokio_util::sync::CancellationToken;

use super::{JobInfo, JobStatus, ProcessLauncher, SupervisorEvent, TranscodeJob, TranscodeProcess};

struct RunningJob {
    info: JobInfo,
    cancel: CancellationToken,
    status: watch::Receiver<JobStatus>,
}

/// Owns the current job of each [`StreamIdentifier`].
///
/// Starting a job stops the identifier's previous job first; both happen
/// under one lock so two starts never overlap. Failures are reported on the
/// event channel and never retried here.
pub struct Supervisor {
    launcher: Arc<dyn ProcessLauncher>,
    grace: Duration,
    current: Mutex<HashMap<StreamIdentifier, RunningJob>>,
    events: broadcast::Sender<SupervisorEvent>,
}

impl Supervisor {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, grace: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            launcher,
            grace,
            current: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Launch `job`, replacing the identifier's current job.
    ///
    /// Returns as soon as the process is running.
    pub async fn start(&self, job: TranscodeJob) -> Result<JobInfo> {
        let identifier = job.identifier;
        let mut current = self.current.lock().await;

        if let Some(previous) = current.remove(&identifier) {
            tracing::info!(
                job_id = %previous.info.id,
                identifier = %identifier,
                "Stopping previous job before start"
            );
            self.shutdown(previous).await;
        }

        let info = job.info();
        let process = self.launcher.launch(job).await.map_err(|e| {
            tracing::error!(job_id = %info.id, identifier = %identifier, "Failed to launch transcoder: {}", e);
            Error::transcode_failed(identifier, e.to_string())
        })?;

        tracing::info!(
            job_id = %info.id,
            identifier = %identifier,
            input = %info.input,
            "Transcoder started"
        );
        self.broadcast(SupervisorEvent::Started(info.clone()));

        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(JobStatus::Running);
        tokio::spawn(monitor(
            process,
            info.clone(),
            cancel.clone(),
            status_tx,
            self.grace,
            self.events.clone(),
        ));

        current.insert(
            identifier,
            RunningJob {
                info: info.clone(),
                cancel,
                status: status_rx,
            },
        );

        Ok(info)
    }

    /// Stop the job with `job_id`. Stopping an unknown or finished job is a
    /// no-op. Returns whether a job was found.
    pub async fn stop(&self, job_id: JobId) -> bool {
        let mut current = self.current.lock().await;
        let key = current
            .iter()
            .find(|(_, running)| running.info.id == job_id)
            .map(|(identifier, _)| *identifier);

        match key.and_then(|k| current.remove(&k)) {
            Some(running) => {
                self.shutdown(running).await;
                true
            }
            None => false,
        }
    }

    /// Stop whatever job currently runs under `identifier`.
    pub async fn stop_identifier(&self, identifier: StreamIdentifier) -> Option<JobInfo> {
        let mut current = self.current.lock().await;
        let running = current.remove(&identifier)?;
        let info = running.info.clone();
        self.shutdown(running).await;
        Some(info)
    }

    /// Stop every job.
    pub async fn stop_all(&self) {
        let mut current = self.current.lock().await;
        for (_, running) in current.drain() {
            self.shutdown(running).await;
        }
    }

    /// The identifier's current job, if any.
    pub async fn current(&self, identifier: StreamIdentifier) -> Option<JobInfo> {
        self.current
            .lock()
            .await
            .get(&identifier)
            .map(|running| running.info.clone())
    }

    /// Status of a job still held as current.
    pub async fn status(&self, job_id: JobId) -> Option<JobStatus> {
        self.current
            .lock()
            .await
            .values()
            .find(|running| running.info.id == job_id)
            .map(|running| running.status.borrow().clone())
    }

    /// Cancel the monitor and wait until the process is gone.
    async fn shutdown(&self, running: RunningJob) {
        running.cancel.cancel();
        let mut status = running.status;
        let _ = status.wait_for(JobStatus::is_terminal).await;
    }

    fn broadcast(&self, event: SupervisorEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("No subscribers for supervisor event");
        }
    }
}

async fn monitor(
    mut process: Box<dyn TranscodeProcess>,
    info: JobInfo,
    cancel: CancellationToken,
    status: watch::Sender<JobStatus>,
    grace: Duration,
    events: broadcast::Sender<SupervisorEvent>,
) {
    let event = tokio::select! {
        outcome = process.wait() => match outcome {
            Ok(outcome) if outcome.success => {
                tracing::info!(job_id = %info.id, identifier = %info.identifier, "Transcoder exited");
                status.send_replace(JobStatus::Exited);
                SupervisorEvent::Exited(info)
            }
            Ok(outcome) => {
                tracing::warn!(
                    job_id = %info.id,
                    identifier = %info.identifier,
                    "Transcoder failed: {}",
                    outcome.description
                );
                status.send_replace(JobStatus::Failed(outcome.description.clone()));
                SupervisorEvent::Failed { job: info, reason: outcome.description }
            }
            Err(e) => {
                tracing::warn!(job_id = %info.id, identifier = %info.identifier, "Lost transcoder: {}", e);
                status.send_replace(JobStatus::Failed(e.to_string()));
                SupervisorEvent::Failed { job: info, reason: e.to_string() }
            }
        },
        _ = cancel.cancelled() => {
            status.send_replace(JobStatus::Stopping);
            if let Err(e) = process.terminate().await {
                tracing::debug!(job_id = %info.id, "Terminate signal failed: {}", e);
            }

            if tokio::time::timeout(grace, process.wait()).await.is_err() {
                tracing::warn!(
                    job_id = %info.id,
                    identifier = %info.identifier,
                    "Transcoder did not exit within {:?}, killing",
                    grace
                );
                if let Err(e) = process.kill().await {
                    tracing::error!(job_id = %info.id, "Failed to kill transcoder: {}", e);
                }
                let _ = process.wait().await;
            }

            tracing::info!(job_id = %info.id, identifier = %info.identifier, "Transcoder stopped");
            status.send_replace(JobStatus::Stopped);
            SupervisorEvent::Stopped(info)
        }
    };

    let _ = events.send(event);
}

//! In-process launcher that simulates transcoder processes.
//!
//! Each launched job gets a [`ProcessHandle`] through which a test can make
//! the process exit, write output files, or check how it was stopped.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use castforge_common::{Error, JobId, Result};
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{ExitOutcome, JobInfo, ProcessLauncher, TranscodeInput, TranscodeJob, TranscodeProcess};

/// Lifecycle of a simulated process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedState {
    Running,
    /// Stopped through a graceful terminate.
    Terminated,
    /// Stopped through kill.
    Killed,
    /// Exited on its own with the given code.
    Exited(i32),
}

/// Test-side control over one simulated process.
#[derive(Clone)]
pub struct ProcessHandle {
    job: JobInfo,
    state: Arc<watch::Sender<SimulatedState>>,
    bytes_read: Arc<AtomicU64>,
}

impl ProcessHandle {
    pub fn job(&self) -> &JobInfo {
        &self.job
    }

    pub fn state(&self) -> SimulatedState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SimulatedState::Running
    }

    /// Make the process exit on its own.
    pub fn exit(&self, code: i32) {
        self.state.send_if_modified(|state| {
            if *state == SimulatedState::Running {
                *state = SimulatedState::Exited(code);
                true
            } else {
                false
            }
        });
    }

    /// Bytes consumed from a live media source.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Write a file into the job's output directory as the engine would:
    /// to a temporary name first, then renamed into place.
    pub fn write_output(&self, relative: impl AsRef<Path>, data: &[u8]) -> std::io::Result<()> {
        let path = self.job.output_dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &path)
    }
}

/// One recorded launch.
#[derive(Clone)]
pub struct LaunchRecord {
    pub job: JobInfo,
    pub handle: ProcessHandle,
}

#[derive(Default)]
struct LauncherState {
    launched: Vec<LaunchRecord>,
    fail_next: bool,
    ignore_terminate: bool,
}

/// [`ProcessLauncher`] that never spawns anything.
#[derive(Clone, Default)]
pub struct MemoryLauncher {
    inner: Arc<Mutex<LauncherState>>,
}

impl MemoryLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next launch fail.
    pub fn fail_next_launch(&self) {
        self.inner.lock().fail_next = true;
    }

    /// Make processes ignore graceful termination, forcing a kill.
    pub fn ignore_terminate(&self, ignore: bool) {
        self.inner.lock().ignore_terminate = ignore;
    }

    /// Every launch so far, oldest first.
    pub fn launched(&self) -> Vec<LaunchRecord> {
        self.inner.lock().launched.clone()
    }

    /// Jobs whose process is still running.
    pub fn running(&self) -> Vec<JobInfo> {
        self.inner
            .lock()
            .launched
            .iter()
            .filter(|record| record.handle.is_running())
            .map(|record| record.job.clone())
            .collect()
    }

    pub fn handle(&self, job_id: JobId) -> Option<ProcessHandle> {
        self.inner
            .lock()
            .launched
            .iter()
            .find(|record| record.job.id == job_id)
            .map(|record| record.handle.clone())
    }

    /// Handle of the most recent launch.
    pub fn last(&self) -> Option<ProcessHandle> {
        self.inner
            .lock()
            .launched
            .last()
            .map(|record| record.handle.clone())
    }
}

#[async_trait]
impl ProcessLauncher for MemoryLauncher {
    async fn launch(&self, job: TranscodeJob) -> Result<Box<dyn TranscodeProcess>> {
        let info = job.info();
        let (state_tx, state_rx) = watch::channel(SimulatedState::Running);
        let handle = ProcessHandle {
            job: info.clone(),
            state: Arc::new(state_tx),
            bytes_read: Arc::new(AtomicU64::new(0)),
        };

        let ignore_terminate = {
            let mut inner = self.inner.lock();
            if std::mem::take(&mut inner.fail_next) {
                return Err(Error::internal("simulated launch failure"));
            }
            inner.launched.push(LaunchRecord {
                job: info,
                handle: handle.clone(),
            });
            inner.ignore_terminate
        };

        if let TranscodeInput::Stream(mut source) = job.input {
            let counter = handle.bytes_read.clone();
            let mut done = state_rx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        chunk = source.recv() => match chunk {
                            Some(chunk) => {
                                counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                            }
                            None => break,
                        },
                        _ = done.wait_for(|s| *s != SimulatedState::Running) => break,
                    }
                }
            });
        }

        Ok(Box::new(MemoryProcess {
            handle,
            state: state_rx,
            ignore_terminate,
        }))
    }
}

struct MemoryProcess {
    handle: ProcessHandle,
    state: watch::Receiver<SimulatedState>,
    ignore_terminate: bool,
}

#[async_trait]
impl TranscodeProcess for MemoryProcess {
    async fn wait(&mut self) -> Result<ExitOutcome> {
        let state = *self
            .state
            .wait_for(|s| *s != SimulatedState::Running)
            .await
            .map_err(|_| Error::internal("simulated process handle dropped"))?;

        Ok(match state {
            SimulatedState::Exited(0) | SimulatedState::Terminated => ExitOutcome::success(),
            SimulatedState::Exited(code) => ExitOutcome::failure(format!("exit status: {}", code)),
            SimulatedState::Killed => ExitOutcome::failure("signal: 9 (SIGKILL)"),
            SimulatedState::Running => ExitOutcome::failure("still running"),
        })
    }

    async fn terminate(&mut self) -> Result<()> {
        if !self.ignore_terminate {
            self.handle.state.send_if_modified(|state| {
                if *state == SimulatedState::Running {
                    *state = SimulatedState::Terminated;
                    true
                } else {
                    false
                }
            });
        }
        Ok(())
    }

    async fn kill(&mut self) -> Result<()> {
        self.handle.state.send_if_modified(|state| {
            if *state == SimulatedState::Running {
                *state = SimulatedState::Killed;
                true
            } else {
                false
            }
        });
        Ok(())
    }
}

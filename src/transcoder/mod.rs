//! Supervised external transcoding.
//!
//! A [`TranscodeJob`] describes one run of the transcoding engine: which
//! input it reads, which [`StreamIdentifier`] namespace it belongs to and
//! where it writes segmented output. The [`Supervisor`] owns the running
//! processes; how a process is actually launched sits behind
//! [`ProcessLauncher`] so tests can swap in [`MemoryLauncher`].

mod ffmpeg;
mod memory;
mod supervisor;

pub use ffmpeg::{FfmpegLauncher, FfmpegProcess, VARIANT_PLAYLIST};
pub use memory::{LaunchRecord, MemoryLauncher, ProcessHandle, SimulatedState};
pub use supervisor::Supervisor;

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use castforge_common::{JobId, Result, StreamIdentifier};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

/// Readable handle on an inbound broadcast's media bytes.
pub struct MediaSource {
    rx: mpsc::Receiver<Bytes>,
    remote_addr: Option<SocketAddr>,
}

impl MediaSource {
    /// Create a source and the sender that feeds it.
    pub fn channel(capacity: usize, remote_addr: Option<SocketAddr>) -> (mpsc::Sender<Bytes>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx, remote_addr })
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Next chunk, or `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

impl fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaSource")
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}

/// What a job reads.
#[derive(Debug)]
pub enum TranscodeInput {
    /// Live bytes from the connected broadcaster.
    Stream(MediaSource),
    /// A file played in a loop.
    File(PathBuf),
    /// Synthesized black frames and silence.
    Generated,
}

impl TranscodeInput {
    pub fn describe(&self) -> String {
        match self {
            TranscodeInput::Stream(source) => match source.remote_addr() {
                Some(addr) => format!("stream from {}", addr),
                None => "stream".to_string(),
            },
            TranscodeInput::File(path) => format!("file {}", path.display()),
            TranscodeInput::Generated => "generated".to_string(),
        }
    }
}

/// One supervised transcoding run.
#[derive(Debug)]
pub struct TranscodeJob {
    pub id: JobId,
    pub identifier: StreamIdentifier,
    pub input: TranscodeInput,
    /// Private directory the engine writes into, one subdirectory per variant.
    pub output_dir: PathBuf,
}

impl TranscodeJob {
    pub fn new(identifier: StreamIdentifier, input: TranscodeInput, output_dir: PathBuf) -> Self {
        Self {
            id: JobId::new(),
            identifier,
            input,
            output_dir,
        }
    }

    pub fn info(&self) -> JobInfo {
        JobInfo {
            id: self.id,
            identifier: self.identifier,
            input: self.input.describe(),
            output_dir: self.output_dir.clone(),
            started_at: Utc::now(),
        }
    }

    /// Segment file name prefix, unique across consecutive jobs of the
    /// same identifier.
    pub fn segment_prefix(&self) -> String {
        format!("{}-{}", self.identifier, self.id.short())
    }
}

/// Cloneable description of a job, kept after its input is handed off.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobInfo {
    pub id: JobId,
    pub identifier: StreamIdentifier,
    pub input: String,
    pub output_dir: PathBuf,
    pub started_at: DateTime<Utc>,
}

impl JobInfo {
    /// Same as [`TranscodeJob::segment_prefix`].
    pub fn segment_prefix(&self) -> String {
        format!("{}-{}", self.identifier, self.id.short())
    }
}

/// Lifecycle of a supervised process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Stopping,
    /// Stopped on request.
    Stopped,
    /// Exited on its own with success.
    Exited,
    /// Exited on its own with failure.
    Failed(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Stopped | JobStatus::Exited | JobStatus::Failed(_))
    }
}

/// Notifications published by the [`Supervisor`].
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    Started(JobInfo),
    Stopped(JobInfo),
    Exited(JobInfo),
    Failed { job: JobInfo, reason: String },
}

impl SupervisorEvent {
    pub fn job(&self) -> &JobInfo {
        match self {
            SupervisorEvent::Started(job)
            | SupervisorEvent::Stopped(job)
            | SupervisorEvent::Exited(job)
            | SupervisorEvent::Failed { job, .. } => job,
        }
    }

    /// Whether the job's process is gone after this event.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SupervisorEvent::Started(_))
    }
}

/// How a process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitOutcome {
    pub success: bool,
    pub description: String,
}

impl ExitOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            description: "exit status: 0".to_string(),
        }
    }

    pub fn failure(description: impl Into<String>) -> Self {
        Self {
            success: false,
            description: description.into(),
        }
    }
}

/// Starts transcoding processes.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Launch a process for `job`. Returns once the process is running.
    async fn launch(&self, job: TranscodeJob) -> Result<Box<dyn TranscodeProcess>>;
}

/// A running transcoding process.
#[async_trait]
pub trait TranscodeProcess: Send {
    /// Wait for the process to exit.
    async fn wait(&mut self) -> Result<ExitOutcome>;

    /// Ask the process to finish.
    async fn terminate(&mut self) -> Result<()>;

    /// Kill the process outright.
    async fn kill(&mut self) -> Result<()>;
}

use castforge_common::{JobId, SessionId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;

/// Online/offline status of the broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Offline,
    /// A transition is in progress; further transitions wait.
    Transitioning,
    Online,
}

/// Why the stream went (or stayed) offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineReason {
    Startup,
    /// The broadcaster closed the connection.
    Disconnected,
    /// An operator forced the disconnect.
    Forced,
    /// The live transcoder died.
    TranscodeFailed,
}

/// Who is broadcasting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Broadcaster {
    pub session_id: SessionId,
    pub remote_addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

/// Consistent view of the stream state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub status: StreamStatus,
    pub broadcaster: Option<Broadcaster>,
    pub last_transition: Option<DateTime<Utc>>,
    pub live_job: Option<JobId>,
    pub offline_job: Option<JobId>,
}

impl StatusSnapshot {
    pub fn initial() -> Self {
        Self {
            status: StreamStatus::Offline,
            broadcaster: None,
            last_transition: None,
            live_job: None,
            offline_job: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == StreamStatus::Online
    }

    /// Offline with the filler running.
    pub fn is_settled_offline(&self) -> bool {
        self.status == StreamStatus::Offline && self.offline_job.is_some()
    }
}

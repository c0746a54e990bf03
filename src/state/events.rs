//! Broadcast event bus.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel with a bounded
//! ring buffer of recent events so late subscribers can catch up.

use std::collections::VecDeque;
use std::net::SocketAddr;

use castforge_common::{JobId, SessionId, StreamIdentifier};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{OfflineReason, StreamStatus};

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

/// What happened.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    // -- Stream lifecycle ----------------------------------------------------
    StreamStarted {
        session_id: SessionId,
        remote_addr: SocketAddr,
    },
    StreamStopped {
        session_id: Option<SessionId>,
        reason: OfflineReason,
    },
    TransitionCompleted {
        status: StreamStatus,
    },

    // -- Transcoding ---------------------------------------------------------
    TranscodeFailed {
        job_id: Option<JobId>,
        identifier: StreamIdentifier,
        reason: String,
    },

    // -- Segment pipeline ----------------------------------------------------
    PipelineFailed {
        job_id: JobId,
        error: String,
    },
    SegmentRemoteWriteFailed {
        job_id: JobId,
        path: String,
        error: String,
    },
    PlaylistPublished {
        job_id: JobId,
        variant: usize,
        media_sequence: u64,
        segments: usize,
    },
}

/// A timestamped event ready for broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    recent: RwLock<VecDeque<Event>>,
}

impl EventBus {
    /// `capacity` sizes the broadcast channel, not the ring buffer.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn broadcast(&self, payload: EventPayload) {
        let event = Event::new(payload);
        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// The `n` most recent events, newest first.
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        self.recent.read().iter().take(n).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let job_id = JobId::new();

        bus.broadcast(EventPayload::PipelineFailed {
            job_id,
            error: "disk full".into(),
        });

        let event = rx.try_recv().unwrap();
        match &event.payload {
            EventPayload::PipelineFailed { job_id: received, .. } => assert_eq!(*received, job_id),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn recent_events_capped_and_newest_first() {
        let bus = EventBus::new(256);
        for _ in 0..150 {
            bus.broadcast(EventPayload::TransitionCompleted {
                status: StreamStatus::Offline,
            });
        }
        bus.broadcast(EventPayload::TransitionCompleted {
            status: StreamStatus::Online,
        });

        assert_eq!(bus.recent_events(500).len(), MAX_RECENT_EVENTS);
        let newest = bus.recent_events(1);
        assert!(matches!(
            newest[0].payload,
            EventPayload::TransitionCompleted {
                status: StreamStatus::Online
            }
        ));
    }

    #[test]
    fn payload_serializes_with_type_tag() {
        let event = Event::new(EventPayload::StreamStopped {
            session_id: None,
            reason: OfflineReason::Forced,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["type"], "stream_stopped");
        assert_eq!(json["payload"]["reason"], "forced");
    }
}

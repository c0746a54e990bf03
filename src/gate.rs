//! Session gate: admits at most one broadcaster.
//!
//! Accepts and disconnects are decided synchronously under the gate's lock
//! and turned into transition requests on one ordered queue. A single driver
//! task feeds that queue to the [`StateMachine`], so transitions happen in
//! the order sessions came and went, and the accept path never waits on a
//! transcoder.

use std::net::SocketAddr;
use std::sync::Arc;

use castforge_common::{Error, Result, SessionId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::state::{OfflineReason, OnlineRequest, StateMachine};
use crate::transcoder::MediaSource;

/// An inbound connection offered to the gate.
#[derive(Debug)]
pub struct BroadcastConnection {
    pub session_id: SessionId,
    pub remote_addr: SocketAddr,
    pub source: MediaSource,
    /// Cancelling closes the underlying transport.
    pub close: CancellationToken,
}

/// The accepted broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub remote_addr: SocketAddr,
    pub started_at: DateTime<Utc>,
}

struct ActiveSession {
    info: SessionInfo,
    close: CancellationToken,
}

/// Work for the transition driver.
#[derive(Debug)]
pub enum TransitionRequest {
    Online(OnlineRequest),
    Offline {
        session_id: SessionId,
        reason: OfflineReason,
    },
}

pub struct SessionGate {
    active: Mutex<Option<ActiveSession>>,
    requests: mpsc::UnboundedSender<TransitionRequest>,
}

impl SessionGate {
    /// Create a gate and the queue its driver consumes.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransitionRequest>) {
        let (requests, rx) = mpsc::unbounded_channel();
        (
            Self {
                active: Mutex::new(None),
                requests,
            },
            rx,
        )
    }

    /// Admit `conn` if nobody is broadcasting.
    ///
    /// A rejected connection is closed and nothing else changes.
    pub fn accept(&self, conn: BroadcastConnection) -> Result<SessionInfo> {
        let mut active = self.active.lock();

        if let Some(current) = active.as_ref() {
            tracing::warn!(
                remote_addr = %conn.remote_addr,
                active_session = %current.info.session_id,
                "Rejecting second broadcaster"
            );
            conn.close.cancel();
            return Err(Error::AlreadyBroadcasting);
        }

        let info = SessionInfo {
            session_id: conn.session_id,
            remote_addr: conn.remote_addr,
            started_at: Utc::now(),
        };
        *active = Some(ActiveSession {
            info: info.clone(),
            close: conn.close,
        });

        tracing::info!(
            session_id = %info.session_id,
            remote_addr = %info.remote_addr,
            "Broadcast session accepted"
        );
        self.enqueue(TransitionRequest::Online(OnlineRequest {
            session_id: info.session_id,
            remote_addr: info.remote_addr,
            connected_at: info.started_at,
            source: conn.source,
        }));

        Ok(info)
    }

    /// End the session identified by `session_id`.
    ///
    /// Only the first call for the current session acts; later or stale
    /// calls return `false`.
    pub fn disconnect(&self, session_id: SessionId, reason: OfflineReason) -> bool {
        let ended = {
            let mut active = self.active.lock();
            match active.as_ref() {
                Some(current) if current.info.session_id == session_id => active.take(),
                _ => None,
            }
        };

        let Some(ended) = ended else {
            tracing::trace!(session_id = %session_id, "Disconnect for inactive session ignored");
            return false;
        };

        ended.close.cancel();
        tracing::info!(session_id = %session_id, reason = ?reason, "Broadcast session ended");
        self.enqueue(TransitionRequest::Offline { session_id, reason });
        true
    }

    /// Close the current session, whoever it is.
    pub fn force_disconnect(&self) -> Result<SessionId> {
        self.end_current(OfflineReason::Forced)
    }

    /// Close the current session for `reason`.
    pub fn end_current(&self, reason: OfflineReason) -> Result<SessionId> {
        let session_id = self
            .active
            .lock()
            .as_ref()
            .map(|current| current.info.session_id)
            .ok_or(Error::NoActiveSession)?;

        self.disconnect(session_id, reason);
        Ok(session_id)
    }

    pub fn current(&self) -> Option<SessionInfo> {
        self.active.lock().as_ref().map(|current| current.info.clone())
    }

    fn enqueue(&self, request: TransitionRequest) {
        if self.requests.send(request).is_err() {
            tracing::error!("Transition driver is gone; request dropped");
        }
    }
}

/// Apply queued transitions one at a time, in order.
pub async fn run_transitions(
    gate: Arc<SessionGate>,
    machine: Arc<StateMachine>,
    mut requests: mpsc::UnboundedReceiver<TransitionRequest>,
) {
    while let Some(request) = requests.recv().await {
        match request {
            TransitionRequest::Online(online) => {
                let session_id = online.session_id;
                if let Err(e) = machine.go_online(online).await {
                    tracing::error!(session_id = %session_id, "Could not go online: {}", e);
                    gate.disconnect(session_id, OfflineReason::TranscodeFailed);
                }
            }
            TransitionRequest::Offline { reason, .. } => {
                machine.go_offline(reason).await;
            }
        }
    }
    tracing::debug!("Transition driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn connection() -> BroadcastConnection {
        let (_tx, source) = MediaSource::channel(4, None);
        BroadcastConnection {
            session_id: SessionId::new(),
            remote_addr: "192.0.2.10:50000".parse().unwrap(),
            source,
            close: CancellationToken::new(),
        }
    }

    #[test]
    fn second_accept_rejected_without_side_effects() {
        let (gate, mut rx) = SessionGate::new();
        let first = connection();
        let first_close = first.close.clone();
        let info = gate.accept(first).unwrap();
        assert_matches!(rx.try_recv().unwrap(), TransitionRequest::Online(_));

        let second = connection();
        let second_close = second.close.clone();
        assert_matches!(gate.accept(second), Err(Error::AlreadyBroadcasting));

        assert!(second_close.is_cancelled());
        assert!(!first_close.is_cancelled());
        assert_eq!(gate.current().unwrap().session_id, info.session_id);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn disconnect_is_debounced() {
        let (gate, mut rx) = SessionGate::new();
        let conn = connection();
        let close = conn.close.clone();
        let info = gate.accept(conn).unwrap();
        let _ = rx.try_recv();

        assert!(gate.disconnect(info.session_id, OfflineReason::Disconnected));
        assert!(!gate.disconnect(info.session_id, OfflineReason::Disconnected));
        assert_matches!(gate.force_disconnect(), Err(Error::NoActiveSession));

        assert!(close.is_cancelled());
        assert_matches!(
            rx.try_recv().unwrap(),
            TransitionRequest::Offline { reason: OfflineReason::Disconnected, .. }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn force_disconnect_closes_transport() {
        let (gate, mut rx) = SessionGate::new();
        let conn = connection();
        let close = conn.close.clone();
        let info = gate.accept(conn).unwrap();
        let _ = rx.try_recv();

        assert_eq!(gate.force_disconnect().unwrap(), info.session_id);
        assert!(close.is_cancelled());
        assert!(gate.current().is_none());

        // The transport then reports the drop; it must not trigger again.
        assert!(!gate.disconnect(info.session_id, OfflineReason::Disconnected));
        assert_matches!(
            rx.try_recv().unwrap(),
            TransitionRequest::Offline { reason: OfflineReason::Forced, .. }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn force_disconnect_when_idle() {
        let (gate, _rx) = SessionGate::new();
        assert_matches!(gate.force_disconnect(), Err(Error::NoActiveSession));
    }

    #[test]
    fn stale_disconnect_leaves_new_session() {
        let (gate, _rx) = SessionGate::new();
        let old = gate.accept(connection()).unwrap();
        gate.disconnect(old.session_id, OfflineReason::Disconnected);
        let new = gate.accept(connection()).unwrap();

        assert!(!gate.disconnect(old.session_id, OfflineReason::Disconnected));
        assert_eq!(gate.current().unwrap().session_id, new.session_id);
    }
}

//! Stream state: the single source of truth for online/offline.
//!
//! [`StreamState`] is shared read-only; only the [`StateMachine`] changes it.
//! Observers read a [`StatusSnapshot`] or await changes on the watch channel.

mod events;
mod machine;
mod types;

pub use events::{Event, EventBus, EventPayload};
pub use machine::{OnlineRequest, StateMachine};
pub use types::*;

use tokio::sync::watch;

/// Process-wide stream state.
pub struct StreamState {
    status: watch::Sender<StatusSnapshot>,
}

impl StreamState {
    pub fn new() -> Self {
        let (status, _) = watch::channel(StatusSnapshot::initial());
        Self { status }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    pub fn status(&self) -> StreamStatus {
        self.status.borrow().status
    }

    pub fn is_online(&self) -> bool {
        self.status() == StreamStatus::Online
    }

    /// Receiver that observes every change.
    pub fn watch(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.subscribe()
    }

    fn update(&self, f: impl FnOnce(&mut StatusSnapshot)) {
        self.status.send_modify(f);
    }
}

impl Default for StreamState {
    fn default() -> Self {
        Self::new()
    }
}

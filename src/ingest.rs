//! Inbound broadcast listener.
//!
//! Broadcasters push an MPEG-TS byte stream over TCP. Each connection is
//! reported as [`IngestEvent::Connected`] carrying a [`MediaSource`] the live
//! transcoder reads from, and [`IngestEvent::Disconnected`] once the socket
//! closes for any reason. The listener knows nothing about sessions; the
//! [`SessionGate`] decides what the events mean.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::BytesMut;
use castforge_common::SessionId;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::gate::{BroadcastConnection, SessionGate};
use crate::state::OfflineReason;
use crate::transcoder::MediaSource;

/// Chunks buffered between the socket and the transcoder.
const SOURCE_CAPACITY: usize = 64;

/// Connection lifecycle as seen by the listener.
#[derive(Debug)]
pub enum IngestEvent {
    Connected(BroadcastConnection),
    Disconnected { session_id: SessionId },
}

/// Bound ingest socket.
pub struct IngestListener {
    listener: TcpListener,
    read_buffer: usize,
}

impl IngestListener {
    pub async fn bind(addr: &str, read_buffer: usize) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind ingest listener on {}", addr))?;
        Ok(Self {
            listener,
            read_buffer,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` fires.
    pub async fn run(self, events: mpsc::Sender<IngestEvent>, shutdown: CancellationToken) {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!("Ingest listening on {}", addr);
        }

        loop {
            let (stream, remote_addr) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!("Ingest accept failed: {}", e);
                        continue;
                    }
                },
            };

            let session_id = SessionId::new();
            let (tx, source) = MediaSource::channel(SOURCE_CAPACITY, Some(remote_addr));
            let close = shutdown.child_token();

            tracing::debug!(session_id = %session_id, remote_addr = %remote_addr, "Inbound connection");
            let connected = IngestEvent::Connected(BroadcastConnection {
                session_id,
                remote_addr,
                source,
                close: close.clone(),
            });
            if events.send(connected).await.is_err() {
                break;
            }

            let events = events.clone();
            let read_buffer = self.read_buffer;
            tokio::spawn(async move {
                pump(stream, tx, close, read_buffer).await;
                let _ = events.send(IngestEvent::Disconnected { session_id }).await;
            });
        }

        tracing::info!("Ingest listener stopped");
    }
}

/// Copy socket bytes into the media source until either side goes away.
async fn pump(
    mut stream: TcpStream,
    tx: mpsc::Sender<bytes::Bytes>,
    close: CancellationToken,
    read_buffer: usize,
) {
    let mut buf = BytesMut::with_capacity(read_buffer);

    loop {
        buf.reserve(read_buffer);
        let read = tokio::select! {
            _ = close.cancelled() => break,
            read = stream.read_buf(&mut buf) => read,
        };

        match read {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Ingest read error: {}", e);
                break;
            }
        }

        let chunk = buf.split().freeze();
        let sent = tokio::select! {
            _ = close.cancelled() => break,
            sent = tx.send(chunk) => sent,
        };
        if sent.is_err() {
            break;
        }
    }
}

/// Feed listener events into the gate.
pub async fn run_gate_events(gate: Arc<SessionGate>, mut events: mpsc::Receiver<IngestEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            IngestEvent::Connected(conn) => {
                if let Err(e) = gate.accept(conn) {
                    tracing::info!("Inbound connection refused: {}", e);
                }
            }
            IngestEvent::Disconnected { session_id } => {
                gate.disconnect(session_id, OfflineReason::Disconnected);
            }
        }
    }
}

//! Socket Link
//!
//! Single responsibility: Run one underlying socket in its own task and report
//! what happens to it.
//!
//! A link plays the part of a socket object with four handlers attached: it
//! reports `Open`, `Message`, `Error` and `Closed` events tagged with its
//! [`SocketId`], and accepts frames to write. Detaching a link (or dropping
//! it) closes the socket quietly: no `Closed` event is reported.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use super::machine::SocketId;
use super::transport::Transport;
use crate::error::TetherError;

/// Something that happened to one socket.
#[derive(Debug)]
pub struct SocketEvent {
    pub socket: SocketId,
    pub kind: SocketEventKind,
}

#[derive(Debug)]
pub enum SocketEventKind {
    Open,
    Message(String),
    Error(TetherError),
    Closed,
}

enum Outgoing {
    Frame(String),
    Close,
}

/// Handle to a running socket task.
pub struct SocketLink {
    id: SocketId,
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl SocketLink {
    /// Spawn a task that connects to `target` and reports into `events`.
    pub fn spawn(
        id: SocketId,
        target: String,
        connect_timeout: Duration,
        events: mpsc::UnboundedSender<SocketEvent>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            run_socket(id, target, connect_timeout, rx, events).await;
        });

        Self { id, tx }
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    /// Queue a text frame. Returns false when the socket task has already ended.
    pub fn transmit(&self, frame: String) -> bool {
        self.tx.send(Outgoing::Frame(frame)).is_ok()
    }

    /// Close the socket without reporting a `Closed` event.
    pub fn detach(self) {
        if self.tx.send(Outgoing::Close).is_err() {
            debug!(socket = self.id, "Socket task already finished");
        }
    }
}

async fn run_socket(
    id: SocketId,
    target: String,
    connect_timeout: Duration,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::UnboundedSender<SocketEvent>,
) {
    let emit = |kind: SocketEventKind| {
        let _ = events.send(SocketEvent { socket: id, kind });
    };

    let mut transport = tokio::select! {
        result = Transport::connect(&target, connect_timeout) => match result {
            Ok(transport) => transport,
            Err(e) => {
                emit(SocketEventKind::Error(e));
                emit(SocketEventKind::Closed);
                return;
            }
        },
        // Nothing is written before Open, so this is a detach or a dropped link
        _ = outgoing.recv() => {
            debug!(socket = id, "Socket detached while connecting");
            return;
        }
    };

    emit(SocketEventKind::Open);

    loop {
        tokio::select! {
            out = outgoing.recv() => match out {
                Some(Outgoing::Frame(text)) => {
                    if let Err(e) = transport.send(text).await {
                        emit(SocketEventKind::Error(e));
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    transport.close().await;
                    debug!(socket = id, "Socket detached");
                    return;
                }
            },
            inbound = transport.recv() => match inbound {
                Ok(Some(text)) => emit(SocketEventKind::Message(text)),
                Ok(None) => break,
                Err(e) => {
                    emit(SocketEventKind::Error(e));
                    break;
                }
            },
        }
    }

    emit(SocketEventKind::Closed);
}

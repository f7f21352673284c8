//! Session Client with Automatic Reconnection
//!
//! Single responsibility: Drive the session machine against real sockets and
//! a real clock, and give the application a cheap handle to talk to it.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    SessionClient                        │
//! │  - Cloneable handle, every call becomes a Command       │
//! └────────────────────────────────────────────────────────┘
//!                            │ mpsc
//!                            ▼
//! ┌────────────────────────────────────────────────────────┐
//! │                  Driver (one task)                      │
//! │  - Owns Session, the live SocketLink, the deadline      │
//! │  - select! over commands, socket events, deadline       │
//! │  - Runs every callback, one at a time                   │
//! └────────────────────────────────────────────────────────┘
//!                            │
//!               ┌────────────┴────────────┐
//!               ▼                         ▼
//!         SocketLink task            Session (no I/O)
//! ```
//!
//! Because only the driver task touches the session, nothing is locked.
//! Callbacks run on the driver task and must not block it.
//!
//! # Usage
//!
//! ```ignore
//! let client = SessionClient::new(ClientConfig::default());
//! client.set_event_callback(|event| println!("{} #{}", event.event, event.seq));
//! client.initialize("wss://chat.example.com/api/v4/websocket", Some(token)).await?;
//!
//! let statuses = client.request(actions::GET_STATUSES, None).await?;
//! ```

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::actions;
use super::backoff::BackoffPolicy;
use super::callbacks::{CallbackSlot, ReplyCallback};
use super::link::{SocketEvent, SocketEventKind, SocketLink};
use super::machine::{Effect, Session, SessionStatus, SocketId};
use super::protocol::{Event, Reply};
use crate::error::{Result, TetherError};

/// Configuration for the session client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Socket URL used by `initialize` when none is given
    pub target: Option<String>,
    /// Credential sent in the authentication challenge
    pub token: Option<String>,
    /// Delay policy between reconnection attempts
    pub backoff: BackoffPolicy,
    /// Give up on a single connection attempt after this long
    pub connect_timeout: Duration,
    /// How long `request` waits for a reply
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            target: None,
            token: None,
            backoff: BackoffPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

enum Command {
    Initialize {
        target: Option<String>,
        token: Option<String>,
        ack: oneshot::Sender<Result<()>>,
    },
    Send {
        action: String,
        data: Option<Value>,
        callback: Option<ReplyCallback>,
        /// Socket the message went out on, and its sequence number
        sent: Option<oneshot::Sender<(Option<SocketId>, u64)>>,
    },
    Abandon {
        socket: Option<SocketId>,
        seq: u64,
    },
    Close,
    SetCallback(CallbackSlot),
    Status(oneshot::Sender<SessionStatus>),
}

/// Handle to a running session.
///
/// Cloning is cheap. The driver task stops once every handle is dropped,
/// closing the socket on its way out. A callback that captures a clone keeps
/// the driver (and its reconnect loop) alive; capture a [`WeakSessionClient`]
/// instead.
#[derive(Clone)]
pub struct SessionClient {
    commands: mpsc::UnboundedSender<Command>,
    request_timeout: Duration,
}

/// Handle that does not keep the driver running.
#[derive(Clone)]
pub struct WeakSessionClient {
    commands: mpsc::WeakUnboundedSender<Command>,
    request_timeout: Duration,
}

impl WeakSessionClient {
    /// `None` once every `SessionClient` has been dropped.
    pub fn upgrade(&self) -> Option<SessionClient> {
        self.commands.upgrade().map(|commands| SessionClient {
            commands,
            request_timeout: self.request_timeout,
        })
    }
}

impl SessionClient {
    /// Spawn the driver task. Must be called from within a tokio runtime.
    ///
    /// Nothing connects until `initialize` is called. The configured target
    /// and token are what `reinitialize` uses until `initialize` names others.
    pub fn new(config: ClientConfig) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            session: Session::new(config.backoff)
                .with_target(config.target.clone(), config.token.clone()),
            commands: rx,
            events_tx,
            events_rx,
            link: None,
            reconnect_at: None,
            connect_timeout: config.connect_timeout,
        };
        tokio::spawn(driver.run());

        Self {
            commands,
            request_timeout: config.request_timeout,
        }
    }

    pub fn downgrade(&self) -> WeakSessionClient {
        WeakSessionClient {
            commands: self.commands.downgrade(),
            request_timeout: self.request_timeout,
        }
    }

    /// Create a client and connect to the configured target.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let target = config.target.clone().ok_or(TetherError::MissingTarget)?;
        let token = config.token.clone();
        let client = Self::new(config);
        client.initialize(target, token).await?;
        Ok(client)
    }

    /// Start connecting to `target`. A no-op while a socket exists.
    pub async fn initialize(&self, target: impl Into<String>, token: Option<String>) -> Result<()> {
        self.initialize_with(Some(target.into()), token).await
    }

    /// Start connecting to the last target passed to `initialize`, or the
    /// configured one if there was none.
    pub async fn reinitialize(&self) -> Result<()> {
        self.initialize_with(None, None).await
    }

    async fn initialize_with(&self, target: Option<String>, token: Option<String>) -> Result<()> {
        let (ack, rx) = oneshot::channel();
        self.command(Command::Initialize { target, token, ack })?;
        rx.await
            .map_err(|_| TetherError::Closed("Session driver stopped".into()))?
    }

    /// Tear the socket down and stay idle. No reconnect is attempted until
    /// `initialize` or `send` is called again.
    pub fn close(&self) {
        if let Err(e) = self.command(Command::Close) {
            debug!(error = %e, "Close on stopped session");
        }
    }

    /// Best-effort send. The callback runs on the driver task when the reply
    /// arrives; it never runs if the message was dropped or the connection
    /// went away first.
    pub fn send(&self, action: &str, data: Option<Value>, callback: Option<ReplyCallback>) {
        self.send_with(action, data, callback, None);
    }

    fn send_with(
        &self,
        action: &str,
        data: Option<Value>,
        callback: Option<ReplyCallback>,
        sent: Option<oneshot::Sender<(Option<SocketId>, u64)>>,
    ) {
        let command = Command::Send {
            action: action.to_string(),
            data,
            callback,
            sent,
        };
        if let Err(e) = self.command(command) {
            warn!(action, error = %e, "Dropping message");
        }
    }

    /// Send and wait for the reply.
    ///
    /// # Errors
    /// - `Closed` when the message was dropped or the connection went away
    /// - `Timeout` after the configured request timeout; the pending entry
    ///   is dropped so a late reply is ignored
    pub async fn request(&self, action: &str, data: Option<Value>) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        let (sent_tx, sent_rx) = oneshot::channel();
        self.send_with(
            action,
            data,
            Some(Box::new(move |reply: Reply| {
                let _ = tx.send(reply);
            })),
            Some(sent_tx),
        );

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(TetherError::Closed(format!(
                "{} abandoned before a reply arrived",
                action
            ))),
            Err(_) => {
                if let Ok((socket, seq)) = sent_rx.await {
                    let _ = self.command(Command::Abandon { socket, seq });
                }
                Err(TetherError::Timeout(action.to_string()))
            }
        }
    }

    /// Snapshot of the session as seen by the driver.
    pub async fn status(&self) -> Result<SessionStatus> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Status(tx))?;
        rx.await
            .map_err(|_| TetherError::Closed("Session driver stopped".into()))
    }

    pub fn set_first_connect_callback(&self, callback: impl FnMut() + Send + 'static) {
        self.set_callback(CallbackSlot::FirstConnect(Box::new(callback)));
    }

    pub fn set_reconnect_callback(&self, callback: impl FnMut() + Send + 'static) {
        self.set_callback(CallbackSlot::Reconnect(Box::new(callback)));
    }

    /// Receives the consecutive failure count.
    pub fn set_close_callback(&self, callback: impl FnMut(u32) + Send + 'static) {
        self.set_callback(CallbackSlot::Close(Box::new(callback)));
    }

    pub fn set_error_callback(&self, callback: impl FnMut(&TetherError) + Send + 'static) {
        self.set_callback(CallbackSlot::Error(Box::new(callback)));
    }

    pub fn set_missed_event_callback(&self, callback: impl FnMut() + Send + 'static) {
        self.set_callback(CallbackSlot::MissedEvent(Box::new(callback)));
    }

    pub fn set_event_callback(&self, callback: impl FnMut(Event) + Send + 'static) {
        self.set_callback(CallbackSlot::Event(Box::new(callback)));
    }

    fn set_callback(&self, slot: CallbackSlot) {
        if let Err(e) = self.command(Command::SetCallback(slot)) {
            debug!(error = %e, "Callback set on stopped session");
        }
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| TetherError::Closed("Session driver stopped".into()))
    }

    // ---- Named actions ----

    pub fn user_typing(
        &self,
        channel_id: &str,
        parent_id: Option<&str>,
        callback: Option<ReplyCallback>,
    ) {
        self.send(
            actions::USER_TYPING,
            Some(actions::user_typing(channel_id, parent_id)),
            callback,
        );
    }

    pub fn user_update_active_status(
        &self,
        user_is_active: bool,
        manual: bool,
        callback: Option<ReplyCallback>,
    ) {
        self.send(
            actions::USER_UPDATE_ACTIVE_STATUS,
            Some(actions::user_update_active_status(user_is_active, manual)),
            callback,
        );
    }

    pub fn get_statuses(&self, callback: Option<ReplyCallback>) {
        self.send(actions::GET_STATUSES, None, callback);
    }

    pub fn get_statuses_by_ids<I, S>(&self, user_ids: I, callback: Option<ReplyCallback>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.send(
            actions::GET_STATUSES_BY_IDS,
            Some(actions::get_statuses_by_ids(user_ids)),
            callback,
        );
    }
}

/// Owns all session state; runs on a single task.
struct Driver {
    session: Session,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<SocketEvent>,
    events_rx: mpsc::UnboundedReceiver<SocketEvent>,
    link: Option<SocketLink>,
    reconnect_at: Option<Instant>,
    connect_timeout: Duration,
}

impl Driver {
    async fn run(mut self) {
        debug!("Session driver started");

        loop {
            self.apply_effects();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.on_socket_event(event),
                _ = reconnect_deadline(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.session.reconnect_due();
                }
            }
        }

        self.session.close();
        self.apply_effects();
        debug!("Session driver stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Initialize { target, token, ack } => {
                let _ = ack.send(self.session.initialize(target, token));
            }
            Command::Send {
                action,
                data,
                callback,
                sent,
            } => {
                let seq = self.session.send(&action, data, callback);
                if let Some(sent) = sent {
                    let _ = sent.send((self.session.socket_id(), seq));
                }
            }
            Command::Abandon { socket, seq } => {
                self.session.abandon(socket, seq);
            }
            Command::Close => self.session.close(),
            Command::SetCallback(slot) => self.session.set_callback(slot),
            Command::Status(tx) => {
                let _ = tx.send(self.session.status());
            }
        }
    }

    fn on_socket_event(&mut self, event: SocketEvent) {
        let socket = event.socket;
        match event.kind {
            SocketEventKind::Open => self.session.handle_open(socket),
            SocketEventKind::Message(text) => self.session.handle_message(socket, &text),
            SocketEventKind::Error(e) => self.session.handle_error(socket, e),
            SocketEventKind::Closed => {
                self.session.handle_close(socket);
                if self.link.as_ref().is_some_and(|link| link.id() == socket) {
                    self.link = None;
                }
            }
        }
    }

    fn apply_effects(&mut self) {
        while let Some(effect) = self.session.next_effect() {
            match effect {
                Effect::Connect { socket, target } => {
                    if let Some(old) = self.link.take() {
                        old.detach();
                    }
                    self.link = Some(SocketLink::spawn(
                        socket,
                        target,
                        self.connect_timeout,
                        self.events_tx.clone(),
                    ));
                }
                Effect::Transmit { socket, frame } => match &self.link {
                    Some(link) if link.id() == socket => {
                        if !link.transmit(frame) {
                            self.session.mark_closed(socket);
                        }
                    }
                    _ => debug!(socket, "No link for transmit"),
                },
                Effect::Disconnect { socket } => {
                    if self.link.as_ref().is_some_and(|link| link.id() == socket) {
                        if let Some(link) = self.link.take() {
                            link.detach();
                        }
                    }
                }
                Effect::ScheduleReconnect { delay } => {
                    self.reconnect_at = Some(Instant::now() + delay);
                }
                Effect::CancelReconnect => self.reconnect_at = None,
            }
        }
    }
}

async fn reconnect_deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

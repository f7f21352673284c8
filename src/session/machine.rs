//! Session State Machine
//!
//! Single responsibility: Own the logical session and decide what happens on
//! every socket event and every application call.
//!
//! # No I/O Here
//!
//! `Session` never touches a socket or a timer. Each transition appends
//! [`Effect`]s to a queue, and whoever drives the machine (see
//! `client::SessionClient`) performs them:
//!
//! ```text
//!   socket open/close/error/message ──┐
//!   initialize / send / close ────────┼──▶ Session ──▶ Effect queue ──▶ driver
//!   reconnect deadline reached ───────┘
//! ```
//!
//! # Socket Generations
//!
//! Every handle gets a fresh [`SocketId`]. Events that carry an id other than
//! the live handle's are ignored, so a detached socket can never reach the
//! callbacks or schedule a reconnect.
//!
//! # State Diagram
//!
//! ```text
//!   Idle ──initialize──▶ Connecting ──open──▶ Open
//!    ▲                       │                 │
//!    │ close()               └──────close──────┤
//!    │                                         ▼
//!    └──────────── close() ─────────────── Closed ──backoff──▶ Connecting
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use super::backoff::BackoffPolicy;
use super::callbacks::{CallbackSlot, Callbacks, ReplyCallback};
use super::protocol::{decode_frame, InboundFrame, OutboundMessage, AUTHENTICATION_CHALLENGE};
use crate::error::{Result, TetherError};

/// Generation id of one underlying socket.
pub type SocketId = u64;

/// Ready state of the live socket handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    Connecting,
    Open,
    Closed,
}

/// Externally visible session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No socket, nothing scheduled
    Idle,
    /// Socket created, waiting for open
    Connecting,
    /// Usable for send/receive
    Open,
    /// Socket torn down, waiting for the backoff delay (or for its close event)
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Open => write!(f, "OPEN"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Work the driver must perform on behalf of the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open a new socket to `target`, reporting events under `socket`
    Connect { socket: SocketId, target: String },
    /// Write one text frame on `socket`
    Transmit { socket: SocketId, frame: String },
    /// Cleanly close `socket`; its later events are already inert
    Disconnect { socket: SocketId },
    /// Call `reconnect_due` after `delay`
    ScheduleReconnect { delay: Duration },
    /// Forget any scheduled reconnect
    CancelReconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SocketHandle {
    id: SocketId,
    state: ReadyState,
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub target: Option<String>,
    pub outbound_sequence: u64,
    pub expected_event_sequence: u64,
    pub consecutive_failures: u32,
    pub pending_requests: usize,
    pub reconnect_scheduled: bool,
}

/// The logical, possibly-reconnecting session.
pub struct Session {
    target: Option<String>,
    token: Option<String>,
    socket: Option<SocketHandle>,
    next_socket_id: SocketId,
    outbound_sequence: u64,
    expected_event_sequence: u64,
    consecutive_failures: u32,
    pending: HashMap<u64, ReplyCallback>,
    callbacks: Callbacks,
    backoff: BackoffPolicy,
    reconnect_scheduled: bool,
    effects: VecDeque<Effect>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

impl Session {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self {
            target: None,
            token: None,
            socket: None,
            next_socket_id: 1,
            outbound_sequence: 1,
            expected_event_sequence: 0,
            consecutive_failures: 0,
            pending: HashMap::new(),
            callbacks: Callbacks::default(),
            backoff,
            reconnect_scheduled: false,
            effects: VecDeque::new(),
        }
    }

    /// Seed the target and token `initialize(None, None)` falls back to
    /// before any explicit target has been given.
    pub fn with_target(mut self, target: Option<String>, token: Option<String>) -> Self {
        self.target = target;
        self.token = token;
        self
    }

    /// Replace the handler in one callback slot.
    pub fn set_callback(&mut self, slot: CallbackSlot) {
        debug!(slot = slot.name(), "Callback registered");
        self.callbacks.set(slot);
    }

    /// Create a socket handle unless one already exists.
    ///
    /// `None` arguments fall back to the previously remembered target and
    /// token. An empty token disables the authentication challenge.
    ///
    /// # Errors
    /// `TetherError::MissingTarget` when no target was ever supplied.
    pub fn initialize(&mut self, target: Option<String>, token: Option<String>) -> Result<()> {
        if self.socket.is_some() {
            debug!("Socket already exists, ignoring initialize");
            return Ok(());
        }

        let Some(target) = target.or_else(|| self.target.clone()) else {
            error!("Session must have a connection target");
            return Err(TetherError::MissingTarget);
        };

        if token.is_some() {
            self.token = token;
        }

        if self.consecutive_failures == 0 {
            info!(url = %target, "Connecting");
        } else {
            debug!(url = %target, failures = self.consecutive_failures, "Reconnecting");
        }

        self.cancel_reconnect();

        let id = self.next_socket_id;
        self.next_socket_id += 1;
        self.socket = Some(SocketHandle {
            id,
            state: ReadyState::Connecting,
        });
        self.target = Some(target.clone());
        self.effects.push_back(Effect::Connect { socket: id, target });

        Ok(())
    }

    /// The socket finished its handshake.
    pub fn handle_open(&mut self, socket: SocketId) {
        let Some(handle) = self.live_handle_mut(socket) else {
            debug!(socket, "Ignoring open from detached socket");
            return;
        };
        handle.state = ReadyState::Open;

        self.expected_event_sequence = 0;

        if let Some(token) = self.token.clone().filter(|t| !t.is_empty()) {
            self.send(AUTHENTICATION_CHALLENGE, Some(json!({ "token": token })), None);
        }

        if self.consecutive_failures > 0 {
            info!(failures = self.consecutive_failures, "Re-established connection");
            self.callbacks.reconnect();
        } else {
            self.callbacks.first_connect();
        }

        self.consecutive_failures = 0;
    }

    /// The socket went away, cleanly or not.
    pub fn handle_close(&mut self, socket: SocketId) {
        if self.live_handle_mut(socket).is_none() {
            debug!(socket, "Ignoring close from detached socket");
            return;
        }

        self.socket = None;
        self.outbound_sequence = 1;
        self.drop_pending();

        if self.consecutive_failures == 0 {
            info!("Socket closed");
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.callbacks.close(self.consecutive_failures);

        let delay = self.backoff.delay(self.consecutive_failures);
        debug!(
            failures = self.consecutive_failures,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        self.reconnect_scheduled = true;
        self.effects.push_back(Effect::ScheduleReconnect { delay });
    }

    /// Transport-level error. Does not close anything by itself.
    pub fn handle_error(&mut self, socket: SocketId, error: TetherError) {
        if self.live_handle_mut(socket).is_none() {
            return;
        }

        if self.consecutive_failures <= 1 {
            warn!(error = %error, "Socket error");
        } else {
            debug!(error = %error, failures = self.consecutive_failures, "Socket error");
        }

        self.callbacks.error(&error);
    }

    /// The socket can no longer be written to; its close event is on the way.
    pub fn mark_closed(&mut self, socket: SocketId) {
        if let Some(handle) = self.live_handle_mut(socket) {
            handle.state = ReadyState::Closed;
        }
    }

    /// Demultiplex one inbound text frame.
    pub fn handle_message(&mut self, socket: SocketId, text: &str) {
        if self.live_handle_mut(socket).is_none() {
            return;
        }

        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                return;
            }
        };

        match frame {
            InboundFrame::Reply(reply) => {
                if let Some(err) = &reply.error {
                    warn!(seq_reply = reply.seq_reply, error = %err, "Request failed");
                }

                match self.pending.remove(&reply.seq_reply) {
                    Some(callback) => callback(reply),
                    None => debug!(seq_reply = reply.seq_reply, "No pending request for reply"),
                }
            }
            InboundFrame::Event(event) => {
                if !self.callbacks.has_event() {
                    return;
                }

                if event.seq != self.expected_event_sequence {
                    warn!(
                        act_seq = event.seq,
                        exp_seq = self.expected_event_sequence,
                        "Missed event"
                    );
                    self.callbacks.missed_event();
                }

                self.expected_event_sequence = event.seq.saturating_add(1);
                self.callbacks.event(event);
            }
        }
    }

    /// Send a request, best-effort.
    ///
    /// Always consumes a sequence number and returns it. The message is only
    /// written when the socket is open; otherwise it is dropped, and a missing
    /// or dead socket triggers `initialize` with the remembered target.
    pub fn send(
        &mut self,
        action: &str,
        data: Option<Value>,
        callback: Option<ReplyCallback>,
    ) -> u64 {
        let seq = self.outbound_sequence;
        self.outbound_sequence += 1;

        match self.socket {
            Some(SocketHandle {
                id,
                state: ReadyState::Open,
            }) => match OutboundMessage::new(action, seq, data).encode() {
                Ok(frame) => {
                    if let Some(callback) = callback {
                        self.pending.insert(seq, callback);
                    }
                    self.effects.push_back(Effect::Transmit { socket: id, frame });
                }
                Err(e) => error!(action, seq, error = %e, "Failed to encode message"),
            },
            Some(SocketHandle {
                state: ReadyState::Connecting,
                ..
            }) => {
                debug!(action, seq, "Socket still connecting, dropping message");
            }
            None
            | Some(SocketHandle {
                state: ReadyState::Closed,
                ..
            }) => {
                if let Some(handle) = self.socket.take() {
                    self.effects.push_back(Effect::Disconnect { socket: handle.id });
                }
                debug!(action, seq, "No open socket, dropping message and reconnecting");
                if let Err(e) = self.initialize(None, None) {
                    error!(error = %e, "Reconnect from send failed");
                }
            }
        }

        seq
    }

    /// Forget the reply callback for `seq` sent on `socket`.
    ///
    /// Only the socket the request went out on is considered, so a sequence
    /// number reused after a reconnect is left alone.
    pub fn abandon(&mut self, socket: Option<SocketId>, seq: u64) -> bool {
        if socket.is_none() || self.socket_id() != socket {
            return false;
        }
        let removed = self.pending.remove(&seq).is_some();
        if removed {
            debug!(seq, "Abandoned pending request");
        }
        removed
    }

    /// Explicit shutdown. The session stays idle until `initialize` (or a
    /// `send`) is called again.
    pub fn close(&mut self) {
        self.consecutive_failures = 0;
        self.outbound_sequence = 1;
        self.cancel_reconnect();
        self.drop_pending();

        if let Some(handle) = self.socket.take() {
            self.effects.push_back(Effect::Disconnect { socket: handle.id });
            info!("Socket closed");
        }
    }

    /// The backoff delay scheduled by the last close has elapsed.
    pub fn reconnect_due(&mut self) {
        if !self.reconnect_scheduled {
            debug!("Stale reconnect deadline, ignoring");
            return;
        }
        self.reconnect_scheduled = false;

        if let Err(e) = self.initialize(None, None) {
            error!(error = %e, "Scheduled reconnect failed");
        }
    }

    /// Next effect for the driver to perform.
    pub fn next_effect(&mut self) -> Option<Effect> {
        self.effects.pop_front()
    }

    pub fn state(&self) -> SessionState {
        match self.socket {
            Some(SocketHandle { state, .. }) => match state {
                ReadyState::Connecting => SessionState::Connecting,
                ReadyState::Open => SessionState::Open,
                ReadyState::Closed => SessionState::Closed,
            },
            None if self.reconnect_scheduled => SessionState::Closed,
            None => SessionState::Idle,
        }
    }

    pub fn socket_id(&self) -> Option<SocketId> {
        self.socket.map(|handle| handle.id)
    }

    pub fn outbound_sequence(&self) -> u64 {
        self.outbound_sequence
    }

    pub fn expected_event_sequence(&self) -> u64 {
        self.expected_event_sequence
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state(),
            target: self.target.clone(),
            outbound_sequence: self.outbound_sequence,
            expected_event_sequence: self.expected_event_sequence,
            consecutive_failures: self.consecutive_failures,
            pending_requests: self.pending.len(),
            reconnect_scheduled: self.reconnect_scheduled,
        }
    }

    fn live_handle_mut(&mut self, socket: SocketId) -> Option<&mut SocketHandle> {
        self.socket.as_mut().filter(|handle| handle.id == socket)
    }

    fn cancel_reconnect(&mut self) {
        if self.reconnect_scheduled {
            self.reconnect_scheduled = false;
            self.effects.push_back(Effect::CancelReconnect);
        }
    }

    /// Sequence numbers restart at 1 on the next socket, so callbacks from the
    /// old one must not be matched against new replies.
    fn drop_pending(&mut self) {
        if !self.pending.is_empty() {
            debug!(count = self.pending.len(), "Abandoning pending requests");
            self.pending.clear();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("status", &self.status())
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::protocol::{Event, Reply};
    use std::sync::{Arc, Mutex};

    const TARGET: &str = "ws://chat.example.test/api/v4/websocket";

    type Log = Arc<Mutex<Vec<String>>>;

    fn drain(session: &mut Session) -> Vec<Effect> {
        std::iter::from_fn(|| session.next_effect()).collect()
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    /// Session with every slot wired to a shared log.
    fn recording_session() -> (Session, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut session = Session::default();

        let l = Arc::clone(&log);
        session.set_callback(CallbackSlot::FirstConnect(Box::new(move || {
            l.lock().unwrap().push("first_connect".into())
        })));
        let l = Arc::clone(&log);
        session.set_callback(CallbackSlot::Reconnect(Box::new(move || {
            l.lock().unwrap().push("reconnect".into())
        })));
        let l = Arc::clone(&log);
        session.set_callback(CallbackSlot::Close(Box::new(move |n: u32| {
            l.lock().unwrap().push(format!("close:{n}"))
        })));
        let l = Arc::clone(&log);
        session.set_callback(CallbackSlot::Error(Box::new(move |_: &TetherError| {
            l.lock().unwrap().push("error".into())
        })));
        let l = Arc::clone(&log);
        session.set_callback(CallbackSlot::MissedEvent(Box::new(move || {
            l.lock().unwrap().push("missed".into())
        })));
        let l = Arc::clone(&log);
        session.set_callback(CallbackSlot::Event(Box::new(move |event: Event| {
            l.lock().unwrap().push(format!("event:{}:{}", event.event, event.seq))
        })));

        (session, log)
    }

    /// Initialize and open, returning the live socket id.
    fn open(session: &mut Session) -> SocketId {
        session.initialize(Some(TARGET.into()), None).unwrap();
        let id = session.socket_id().unwrap();
        session.handle_open(id);
        drain(session);
        id
    }

    #[test]
    fn test_initialize_without_target_fails() {
        let mut session = Session::default();
        assert!(matches!(
            session.initialize(None, None),
            Err(TetherError::MissingTarget)
        ));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(drain(&mut session).is_empty());
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let mut session = Session::default();
        session.initialize(Some(TARGET.into()), None).unwrap();
        session.initialize(Some(TARGET.into()), None).unwrap();

        let connects = drain(&mut session)
            .into_iter()
            .filter(|e| matches!(e, Effect::Connect { .. }))
            .count();
        assert_eq!(connects, 1);
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[test]
    fn test_open_sends_authentication_challenge() {
        let mut session = Session::default();
        session
            .initialize(Some(TARGET.into()), Some("secret".into()))
            .unwrap();
        let id = session.socket_id().unwrap();
        drain(&mut session);

        session.handle_open(id);
        let effects = drain(&mut session);
        assert_eq!(effects.len(), 1);
        let Effect::Transmit { socket, frame } = &effects[0] else {
            panic!("expected transmit, got {effects:?}");
        };
        assert_eq!(*socket, id);
        let value: Value = serde_json::from_str(frame).unwrap();
        assert_eq!(
            value,
            json!({"action": "authentication_challenge", "seq": 1, "data": {"token": "secret"}})
        );
        assert_eq!(session.outbound_sequence(), 2);
    }

    #[test]
    fn test_empty_token_skips_challenge() {
        let mut session = Session::default();
        session.initialize(Some(TARGET.into()), Some(String::new())).unwrap();
        let id = session.socket_id().unwrap();
        drain(&mut session);

        session.handle_open(id);
        assert!(drain(&mut session).is_empty());
        assert_eq!(session.outbound_sequence(), 1);
    }

    #[test]
    fn test_exactly_one_connect_callback_per_open() {
        let (mut session, log) = recording_session();
        let first = open(&mut session);
        assert_eq!(entries(&log), vec!["first_connect"]);

        session.handle_close(first);
        session.reconnect_due();
        let second = session.socket_id().unwrap();
        assert_ne!(first, second);
        session.handle_open(second);

        assert_eq!(entries(&log), vec!["first_connect", "close:1", "reconnect"]);
        assert_eq!(session.consecutive_failures(), 0);
    }

    #[test]
    fn test_failed_connects_accumulate_before_reconnect() {
        let (mut session, log) = recording_session();
        session.initialize(Some(TARGET.into()), None).unwrap();

        for _ in 0..3 {
            let id = session.socket_id().unwrap();
            session.handle_close(id);
            session.reconnect_due();
        }
        assert_eq!(session.consecutive_failures(), 3);

        let id = session.socket_id().unwrap();
        session.handle_open(id);
        assert_eq!(
            entries(&log),
            vec!["close:1", "close:2", "close:3", "reconnect"]
        );
    }

    #[test]
    fn test_close_resets_sequence_and_schedules_backoff() {
        let mut session = Session::default();
        let id = open(&mut session);
        session.send("get_statuses", None, None);
        session.send("get_statuses", None, None);
        assert_eq!(session.outbound_sequence(), 3);
        drain(&mut session);

        session.handle_close(id);
        assert_eq!(session.outbound_sequence(), 1);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(
            drain(&mut session),
            vec![Effect::ScheduleReconnect {
                delay: Duration::from_millis(3_000)
            }]
        );
    }

    #[test]
    fn test_backoff_grows_with_consecutive_failures() {
        let mut session = Session::default();
        session.initialize(Some(TARGET.into()), None).unwrap();

        let mut delays = Vec::new();
        for _ in 0..8 {
            let id = session.socket_id().unwrap();
            drain(&mut session);
            session.handle_close(id);
            for effect in drain(&mut session) {
                if let Effect::ScheduleReconnect { delay } = effect {
                    delays.push(delay);
                }
            }
            session.reconnect_due();
        }

        assert_eq!(delays.len(), 8);
        assert!(delays[..7]
            .iter()
            .all(|d| *d == Duration::from_millis(3_000)));
        assert_eq!(delays[7], Duration::from_millis(192_000));
    }

    #[test]
    fn test_sequence_strictly_increasing_between_resets() {
        let mut session = Session::default();
        open(&mut session);

        let seqs: Vec<u64> = (0..5)
            .map(|_| session.send("user_typing", None, None))
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_reply_invokes_callback_exactly_once() {
        let mut session = Session::default();
        let id = open(&mut session);
        let calls = Arc::new(Mutex::new(Vec::new()));

        let c = Arc::clone(&calls);
        let seq = session.send(
            "get_statuses",
            None,
            Some(Box::new(move |reply: Reply| c.lock().unwrap().push(reply.seq_reply))),
        );
        assert_eq!(session.pending_requests(), 1);

        let reply = format!(r#"{{"status":"OK","seq_reply":{seq},"data":{{}}}}"#);
        session.handle_message(id, &reply);
        session.handle_message(id, &reply);

        assert_eq!(*calls.lock().unwrap(), vec![seq]);
        assert_eq!(session.pending_requests(), 0);
    }

    #[test]
    fn test_error_reply_still_delivered() {
        let mut session = Session::default();
        let id = open(&mut session);
        let got = Arc::new(Mutex::new(None));

        let g = Arc::clone(&got);
        let seq = session.send(
            "get_statuses_by_ids",
            Some(json!({"user_ids": []})),
            Some(Box::new(move |reply: Reply| *g.lock().unwrap() = Some(reply))),
        );
        session.handle_message(
            id,
            &format!(r#"{{"status":"FAIL","seq_reply":{seq},"error":{{"message":"bad"}}}}"#),
        );

        let reply = got.lock().unwrap().take().unwrap();
        assert!(reply.is_error());
    }

    #[test]
    fn test_reply_for_unknown_sequence_is_dropped() {
        let (mut session, log) = recording_session();
        let id = open(&mut session);
        session.handle_message(id, r#"{"status":"OK","seq_reply":42}"#);
        assert_eq!(entries(&log), vec!["first_connect"]);
    }

    #[test]
    fn test_missed_event_fires_before_event() {
        let (mut session, log) = recording_session();
        let id = open(&mut session);

        for seq in 0..5 {
            session.handle_message(id, &format!(r#"{{"event":"typing","seq":{seq},"data":{{}}}}"#));
        }
        assert_eq!(session.expected_event_sequence(), 5);
        log.lock().unwrap().clear();

        session.handle_message(id, r#"{"event":"posted","seq":7,"data":{}}"#);
        assert_eq!(entries(&log), vec!["missed", "event:posted:7"]);
        assert_eq!(session.expected_event_sequence(), 8);
    }

    #[test]
    fn test_event_sequence_resets_on_open() {
        let (mut session, log) = recording_session();
        let id = open(&mut session);
        session.handle_message(id, r#"{"event":"hello","seq":0,"data":{}}"#);
        session.handle_message(id, r#"{"event":"posted","seq":1,"data":{}}"#);
        session.handle_close(id);
        session.reconnect_due();
        let id = session.socket_id().unwrap();
        session.handle_open(id);
        assert_eq!(session.expected_event_sequence(), 0);

        log.lock().unwrap().clear();
        session.handle_message(id, r#"{"event":"hello","seq":0,"data":{}}"#);
        assert_eq!(entries(&log), vec!["event:hello:0"]);
    }

    #[test]
    fn test_events_ignored_without_event_callback() {
        let mut session = Session::default();
        let id = open(&mut session);
        session.handle_message(id, r#"{"event":"posted","seq":3,"data":{}}"#);
        assert_eq!(session.expected_event_sequence(), 0);
    }

    #[test]
    fn test_malformed_frame_is_dropped() {
        let (mut session, log) = recording_session();
        let id = open(&mut session);
        session.handle_message(id, "{not json");
        session.handle_message(id, r#"{"event":"hello","seq":0}"#);
        assert_eq!(entries(&log), vec!["first_connect", "event:hello:0"]);
        assert_eq!(session.state(), SessionState::Open);
    }

    #[test]
    fn test_send_while_connecting_drops_message() {
        let mut session = Session::default();
        session.initialize(Some(TARGET.into()), None).unwrap();
        drain(&mut session);

        let calls = Arc::new(Mutex::new(0));
        let c = Arc::clone(&calls);
        let seq = session.send(
            "get_statuses",
            None,
            Some(Box::new(move |_: Reply| *c.lock().unwrap() += 1)),
        );
        assert_eq!(seq, 1);
        assert_eq!(session.outbound_sequence(), 2);
        assert_eq!(session.pending_requests(), 0);
        assert!(drain(&mut session).is_empty());
    }

    #[test]
    fn test_send_without_socket_reinitializes() {
        let mut session = Session::default();
        let id = open(&mut session);
        session.handle_close(id);
        drain(&mut session);

        session.send("user_typing", Some(json!({"channel_id": "c1"})), None);
        let effects = drain(&mut session);
        assert!(effects.contains(&Effect::CancelReconnect));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Connect { target, .. } if target == TARGET)));
        assert!(!effects.iter().any(|e| matches!(e, Effect::Transmit { .. })));
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[test]
    fn test_send_on_closed_handle_replaces_socket() {
        let mut session = Session::default();
        let old = open(&mut session);
        session.mark_closed(old);
        assert_eq!(session.state(), SessionState::Closed);

        session.send("get_statuses", None, None);
        let effects = drain(&mut session);
        assert_eq!(effects[0], Effect::Disconnect { socket: old });
        let new = session.socket_id().unwrap();
        assert_ne!(old, new);

        // The replaced socket's close event is inert
        session.handle_close(old);
        assert_eq!(session.consecutive_failures(), 0);
        assert_eq!(session.socket_id(), Some(new));
    }

    #[test]
    fn test_send_without_any_target_stays_idle() {
        let mut session = Session::default();
        assert_eq!(session.send("get_statuses", None, None), 1);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(drain(&mut session).is_empty());
    }

    #[test]
    fn test_explicit_close_schedules_no_reconnect() {
        let (mut session, log) = recording_session();
        let id = open(&mut session);
        session.send("get_statuses", None, None);
        drain(&mut session);

        session.close();
        assert_eq!(drain(&mut session), vec![Effect::Disconnect { socket: id }]);
        assert_eq!(session.outbound_sequence(), 1);

        // The detached socket eventually reports its close
        session.handle_close(id);
        assert!(drain(&mut session).is_empty());
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(entries(&log), vec!["first_connect"]);
    }

    #[test]
    fn test_close_cancels_scheduled_reconnect() {
        let mut session = Session::default();
        let id = open(&mut session);
        session.handle_close(id);
        drain(&mut session);

        session.close();
        assert_eq!(drain(&mut session), vec![Effect::CancelReconnect]);
        assert_eq!(session.consecutive_failures(), 0);

        session.reconnect_due();
        assert!(drain(&mut session).is_empty());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_close_while_connecting_returns_to_idle() {
        let mut session = Session::default();
        session.initialize(Some(TARGET.into()), None).unwrap();
        let id = session.socket_id().unwrap();
        drain(&mut session);

        session.close();
        assert_eq!(drain(&mut session), vec![Effect::Disconnect { socket: id }]);

        session.handle_open(id);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_pending_requests_abandoned_on_disconnect() {
        let mut session = Session::default();
        let id = open(&mut session);
        let calls = Arc::new(Mutex::new(0));

        let c = Arc::clone(&calls);
        session.send(
            "get_statuses",
            None,
            Some(Box::new(move |_: Reply| *c.lock().unwrap() += 1)),
        );
        session.handle_close(id);
        assert_eq!(session.pending_requests(), 0);

        session.reconnect_due();
        let id = session.socket_id().unwrap();
        session.handle_open(id);
        session.handle_message(id, r#"{"status":"OK","seq_reply":1}"#);
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_error_forwarded_without_closing() {
        let (mut session, log) = recording_session();
        let id = open(&mut session);
        session.handle_error(id, TetherError::Transport("reset by peer".into()));
        assert_eq!(entries(&log), vec!["first_connect", "error"]);
        assert_eq!(session.state(), SessionState::Open);
    }

    #[test]
    fn test_seeded_target_used_until_replaced() {
        let mut session = Session::default().with_target(Some("ws://seeded".into()), None);
        session.initialize(None, None).unwrap();
        assert_eq!(session.status().target.as_deref(), Some("ws://seeded"));

        session.close();
        session.initialize(Some(TARGET.into()), None).unwrap();
        session.close();
        session.initialize(None, None).unwrap();
        assert_eq!(session.status().target.as_deref(), Some(TARGET));
    }

    #[test]
    fn test_abandon_drops_callback_on_same_socket_only() {
        let mut session = Session::default();
        let id = open(&mut session);
        let seq = session.send("get_statuses", None, Some(Box::new(|_: Reply| {})));
        assert_eq!(session.pending_requests(), 1);

        assert!(!session.abandon(Some(id + 1), seq));
        assert!(!session.abandon(None, seq));
        assert_eq!(session.pending_requests(), 1);

        assert!(session.abandon(Some(id), seq));
        assert_eq!(session.pending_requests(), 0);
        assert!(!session.abandon(Some(id), seq));
    }

    #[test]
    fn test_status_snapshot() {
        let mut session = Session::default();
        open(&mut session);
        session.send("get_statuses", None, Some(Box::new(|_: Reply| {})));

        let status = session.status();
        assert_eq!(status.state, SessionState::Open);
        assert_eq!(status.target.as_deref(), Some(TARGET));
        assert_eq!(status.outbound_sequence, 2);
        assert_eq!(status.pending_requests, 1);
        assert!(!status.reconnect_scheduled);
    }
}

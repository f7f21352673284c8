//! Chat Server Session Module
//!
//! A resilient client for the chat server's websocket. One logical session
//! survives any number of dropped connections; the application registers
//! callbacks and sends requests without ever seeing a reconnect.
//!
//! # Architecture
//!
//! The module is organized by concern, with each submodule having a single responsibility:
//!
//! | Module      | Responsibility                                      |
//! |-------------|-----------------------------------------------------|
//! | `transport` | WebSocket connect/send/receive                      |
//! | `protocol`  | JSON wire format, reply/event classification        |
//! | `backoff`   | Reconnect delay policy                              |
//! | `callbacks` | Lifecycle callback slots                            |
//! | `machine`   | Connection state machine, sequences, pending table  |
//! | `link`      | One socket running in its own task                  |
//! | `client`    | Driver task and the application-facing handle       |
//! | `actions`   | Named server actions and their payloads             |
//!
//! # Key Design Principles
//!
//! ## 1. The State Machine Does No I/O
//!
//! - `Session` turns socket events and application calls into `Effect`s
//! - Every invariant (sequence resets, backoff, gap detection) is testable
//!   without a network or a clock
//!
//! ## 2. One Task Owns the Session
//!
//! - The driver task runs every handler and every callback one at a time
//! - Nothing is locked; commands and socket events arrive over channels
//!
//! ## 3. Stale Sockets Cannot Reach the Session
//!
//! - Each socket gets a fresh `SocketId`
//! - Events from a replaced or closed socket are ignored
//!
//! # Usage
//!
//! ```ignore
//! use tether::session::{ClientConfig, SessionClient};
//!
//! let client = SessionClient::new(ClientConfig::default());
//! client.set_reconnect_callback(|| tracing::info!("Back online"));
//! client.initialize("wss://chat.example.com/api/v4/websocket", Some(token)).await?;
//!
//! client.user_typing("channel-id", None, None);
//! ```

pub mod actions;
pub mod backoff;
pub mod callbacks;
pub mod client;
pub mod link;
pub mod machine;
pub mod protocol;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use callbacks::{CallbackSlot, ReplyCallback};
pub use client::{ClientConfig, SessionClient, WeakSessionClient};
pub use machine::{Effect, Session, SessionState, SessionStatus, SocketId};
pub use protocol::{Event, Reply};

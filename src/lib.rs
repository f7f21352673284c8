//! Tether - resilient websocket session client for real-time chat services
//!
//! Keeps one logical session with a chat server alive across dropped
//! connections, correlates request replies, and detects gaps in the pushed
//! event stream.

pub mod config;
pub mod error;
pub mod logging;
pub mod notification;
pub mod session;

pub use config::Args;
pub use error::{Result, TetherError};
pub use notification::{Notification, NotificationFormatter};
pub use session::{ClientConfig, Event, Reply, SessionClient, SessionState};

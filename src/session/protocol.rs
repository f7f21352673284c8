//! Wire Protocol
//!
//! Single responsibility: Encode outbound frames and classify inbound ones.
//! No knowledge of sockets, counters or callbacks.
//!
//! # Wire Format
//!
//! Every frame is a JSON object sent as a websocket text message.
//!
//! ## Outbound request
//! ```text
//! {
//!     "action": <string>,    // e.g. "user_typing"
//!     "seq": <u64>,          // Per-connection request counter
//!     "data": <object|null>, // Opaque to the session
//! }
//! ```
//!
//! ## Inbound reply
//! ```text
//! {
//!     "seq_reply": <u64>,    // Matches the request "seq"
//!     "error": <any>,        // Optional, delivered untouched
//!     ...                    // "status", "data", anything else
//! }
//! ```
//!
//! ## Inbound event
//! ```text
//! {
//!     "seq": <u64>,          // Per-connection event counter
//!     "event": <string>,     // e.g. "posted", "typing", "hello"
//!     "data": <object>,
//!     ...                    // "broadcast" and friends
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, TetherError};

/// Action sent once per underlying connection when a token is configured.
pub const AUTHENTICATION_CHALLENGE: &str = "authentication_challenge";

/// A request frame ready to be encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub action: String,
    pub seq: u64,
    pub data: Option<Value>,
}

impl OutboundMessage {
    pub fn new(action: impl Into<String>, seq: u64, data: Option<Value>) -> Self {
        Self {
            action: action.into(),
            seq,
            data,
        }
    }

    /// Encode into a text frame.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Reply to a request, correlated through `seq_reply`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub seq_reply: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    /// Everything else the server put in the frame
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Reply {
    /// Whether the server attached an error to this reply.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The `status` field, when present ("OK", "FAIL").
    pub fn status(&self) -> Option<&str> {
        self.payload.get("status").and_then(Value::as_str)
    }

    /// The `data` field, when present.
    pub fn data(&self) -> Option<&Value> {
        self.payload.get("data")
    }

    /// Turn an error-carrying reply into `TetherError::Server`.
    pub fn into_result(self) -> Result<Reply> {
        match &self.error {
            Some(error) => Err(TetherError::Server(describe_error(error))),
            None => Ok(self),
        }
    }
}

/// Server-pushed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An inbound frame after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Reply(Reply),
    Event(Event),
}

/// Decode and classify a text frame.
///
/// A frame carrying a non-null `seq_reply` is a reply; anything else must
/// parse as an event.
pub fn decode_frame(text: &str) -> Result<InboundFrame> {
    let value: Value = serde_json::from_str(text)?;

    let is_reply = match value.as_object() {
        Some(map) => map.get("seq_reply").is_some_and(|v| !v.is_null()),
        None => return Err(TetherError::Protocol("Frame is not a JSON object".into())),
    };

    if is_reply {
        Ok(InboundFrame::Reply(serde_json::from_value(value)?))
    } else {
        Ok(InboundFrame::Event(serde_json::from_value(value)?))
    }
}

/// Human readable summary of a reply's `error` value.
fn describe_error(error: &Value) -> String {
    error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

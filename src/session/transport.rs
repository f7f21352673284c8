//! WebSocket Transport Layer
//!
//! Single responsibility: Connect to a WebSocket and send/receive text frames.
//! No knowledge of sequences, replies, events or reconnection.

use std::time::Duration;

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{client::IntoClientRequest, protocol::Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use crate::error::{Result, TetherError};

/// Type alias for the WebSocket send half
pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;

/// Type alias for the WebSocket receive half
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// A connected WebSocket transport.
///
/// Can only be constructed via `Transport::connect()`.
pub struct Transport {
    sink: WsSink,
    stream: WsStream,
}

impl Transport {
    /// Connect to a WebSocket endpoint, giving up after `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        debug!(url = %url, "Connecting to WebSocket");

        let request = url
            .into_client_request()
            .map_err(|e| TetherError::Transport(format!("Invalid target {}: {}", url, e)))?;

        let (ws, _) = tokio::time::timeout(timeout, connect_async_with_config(request, None, false))
            .await
            .map_err(|_| TetherError::Timeout(format!("Connecting to {}", url)))?
            .map_err(|e| TetherError::Transport(format!("WebSocket connect failed: {}", e)))?;

        let (sink, stream) = ws.split();

        debug!(url = %url, "WebSocket connected");
        Ok(Self { sink, stream })
    }

    /// Send a text frame.
    pub async fn send(&mut self, text: String) -> Result<()> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TetherError::Transport(format!("Failed to send: {}", e)))
    }

    /// Receive the next text frame.
    ///
    /// Returns None once the connection is closed. Binary frames are handed
    /// back as (lossy) UTF-8; control frames are skipped.
    pub async fn recv(&mut self) -> Result<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(String::from_utf8_lossy(&data).into_owned()))
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(frame = ?frame, "Peer closed connection");
                    return Ok(None);
                }
                // Pong is handled automatically by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(TetherError::Transport(format!("WebSocket error: {}", e)))
                }
                None => return Ok(None),
            }
        }
    }

    /// Send a close frame and flush.
    pub async fn close(mut self) {
        if let Err(e) = self.sink.close().await {
            debug!(error = %e, "Error while closing WebSocket");
        }
    }
}

//! WebSocket Transport Layer
//!
//! Single responsibility: Open a connection and move opaque frames in both directions.
//! No knowledge of hubs, envelopes or reconnection.

use async_trait::async_trait;
use futures::future;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{http::Request, protocol::Message},
};
use tracing::debug;

use crate::error::HubError;

/// Send half of an open link.
pub type FrameSink = Pin<Box<dyn Sink<Vec<u8>, Error = HubError> + Send>>;

/// Receive half of an open link. The stream ends when the peer closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, HubError>> + Send>>;

/// An open, split connection.
///
/// Frames are delivered in the order they arrived on the wire.
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Link {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

/// Something that can open links to a hub server.
///
/// `connect` resolving is the "open" event; the stream ending or yielding an
/// error is the "close" event.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Link, HubError>;
}

/// Connector backed by tokio-tungstenite.
///
/// UTF-8 payloads go out as text frames, everything else as binary frames.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Link, HubError> {
        debug!(url = %url, "Connecting to WebSocket");

        let request = Request::builder()
            .uri(url)
            .header("Host", extract_host(url))
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .body(())
            .map_err(|e| HubError::Transport(format!("Failed to build request: {}", e)))?;

        let (ws, _) = connect_async_with_config(request, None, false)
            .await
            .map_err(|e| HubError::Transport(format!("WebSocket connect failed: {}", e)))?;

        let (write, read) = ws.split();

        let sink = write
            .sink_map_err(|e| HubError::Transport(format!("Failed to send: {}", e)))
            .with(|bytes: Vec<u8>| future::ready(Ok::<_, HubError>(to_message(bytes))));

        let stream = read.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.into_bytes())),
                Ok(Message::Binary(data)) => Some(Ok(data)),
                // Pong is handled automatically by tungstenite; the stream ends after Close
                Ok(_) => None,
                Err(e) => Some(Err(HubError::Transport(format!("WebSocket error: {}", e)))),
            })
        });

        debug!(url = %url, "WebSocket connected");
        Ok(Link::new(Box::pin(sink), Box::pin(stream)))
    }
}

fn to_message(bytes: Vec<u8>) -> Message {
    match String::from_utf8(bytes) {
        Ok(text) => Message::Text(text),
        Err(e) => Message::Binary(e.into_bytes()),
    }
}

/// Extract host from URL for Host header
fn extract_host(url: &str) -> &str {
    url.split("//")
        .nth(1)
        .and_then(|s| s.split('/').next())
        .unwrap_or("localhost")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_host() {
        assert_eq!(extract_host("ws://localhost:8888"), "localhost:8888");
        assert_eq!(extract_host("wss://example.com/hubs"), "example.com");
        assert_eq!(extract_host("invalid"), "localhost");
    }

    #[test]
    fn test_to_message_picks_frame_type() {
        assert!(matches!(to_message(b"{\"a\":1}".to_vec()), Message::Text(t) if t == "{\"a\":1}"));
        assert!(matches!(to_message(vec![0x81, 0xff]), Message::Binary(b) if b == vec![0x81, 0xff]));
    }
}

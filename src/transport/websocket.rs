//! WebSocket network provider.
//!
//! Default [`NetworkProvider`] for `ws://` endpoints. Each frame travels as
//! one binary WebSocket message.
//!
//! `wss://` endpoints need a TLS backend enabled on `tokio-tungstenite`;
//! without one the connect attempt fails as a transport error and the
//! supervisor fails over to the next endpoint.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};

use crate::error::{Error, Result};

use super::Endpoint;
use super::link::{FrameSink, FrameSource, Link, NetworkProvider};

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// WebSocketNetwork
// ============================================================================

/// Connects to endpoints over WebSocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketNetwork;

impl WebSocketNetwork {
    /// Creates the provider.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NetworkProvider for WebSocketNetwork {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Link> {
        if !matches!(endpoint.url().scheme(), "ws" | "wss") {
            return Err(Error::transport(format!(
                "WebSocket provider cannot reach '{endpoint}'"
            )));
        }

        let (ws_stream, response) = connect_async(endpoint.url().as_str())
            .await
            .map_err(|e| Error::transport(format!("WebSocket connect failed: {e}")))?;

        debug!(%endpoint, status = %response.status(), "WebSocket connected");

        let (write, read) = ws_stream.split();
        Ok(Link::new(WsSink { write, closed: false }, WsSource { read }))
    }
}

// ============================================================================
// WsSink
// ============================================================================

struct WsSink {
    write: SplitSink<WsStream, Message>,
    closed: bool,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: Vec<u8>) -> Result<()> {
        self.write.send(Message::Binary(frame.into())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.write.close().await {
            trace!(error = %e, "WebSocket close failed");
        }
    }
}

// ============================================================================
// WsSource
// ============================================================================

struct WsSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn recv(&mut self) -> Option<Result<Vec<u8>>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Binary(data)) => return Some(Ok(data.to_vec())),
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().as_bytes().to_vec())),
                Ok(Message::Close(_)) => return None,
                // Ping, Pong and raw frames are handled by tungstenite
                Ok(_) => {}
                Err(e) => return Some(Err(Error::WebSocket(e))),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_rejects_non_websocket_scheme() {
        let endpoint = Endpoint::parse("tcp://127.0.0.1:1").expect("valid");
        let result = WebSocketNetwork::new().connect(&endpoint).await;
        assert!(matches!(result, Err(Error::Transport { .. })));
    }

    #[tokio::test]
    async fn test_binary_frames_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        // Echo server
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
            while let Some(Ok(message)) = ws.next().await {
                if message.is_binary() && ws.send(message).await.is_err() {
                    break;
                }
            }
        });

        let endpoint = Endpoint::parse(&format!("ws://127.0.0.1:{port}")).expect("valid");
        let mut link = WebSocketNetwork::new().connect(&endpoint).await.expect("connect");

        link.sink.send(b"frame".to_vec()).await.expect("send");
        let echoed = link.source.recv().await.expect("frame").expect("ok");
        assert_eq!(echoed, b"frame");

        link.sink.close().await;
        link.sink.close().await;
    }
}

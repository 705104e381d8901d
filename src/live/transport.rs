use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::error::LiveError;

/// One application frame on the duplex connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// An open duplex connection
///
/// `recv` must be cancel-safe: the connection task polls it inside
/// `tokio::select!` alongside the outbound queue.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: Frame) -> Result<(), LiveError>;

    /// Next inbound frame. `Ok(None)` means the stream ended without a close
    /// frame; a close frame is reported as `Err(LiveError::RemoteClosed)`.
    async fn recv(&mut self) -> Result<Option<Frame>, LiveError>;

    /// Close the connection. Safe to call repeatedly.
    async fn close(&mut self);
}

/// Opens transports to an endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Transport>, LiveError>;
}

/// Endpoint with the query string (which may hold an API key) removed
pub fn redact_endpoint(endpoint: &str) -> &str {
    endpoint.split('?').next().unwrap_or(endpoint)
}

/// WebSocket connector (TLS via native-tls)
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Transport>, LiveError> {
        info!("Connecting to {}", redact_endpoint(endpoint));

        let (stream, response) = connect_async(endpoint)
            .await
            .map_err(|e| LiveError::Transport(format!("WebSocket connect failed: {}", e)))?;

        info!("WebSocket connected (HTTP {})", response.status());

        Ok(Box::new(WsTransport {
            stream,
            closed: false,
        }))
    }
}

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: Frame) -> Result<(), LiveError> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(bytes) => Message::Binary(bytes),
        };
        self.stream
            .send(message)
            .await
            .map_err(|e| LiveError::Transport(format!("WebSocket send failed: {}", e)))
    }

    async fn recv(&mut self) -> Result<Option<Frame>, LiveError> {
        loop {
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    return Err(LiveError::Transport(format!("WebSocket read failed: {}", e)))
                }
                None => return Ok(None),
            };

            match message {
                Message::Text(text) => return Ok(Some(Frame::Text(text))),
                Message::Binary(bytes) => return Ok(Some(Frame::Binary(bytes))),
                Message::Close(frame) => {
                    self.closed = true;
                    let detail = match frame {
                        Some(frame) => format!("code {}: {}", u16::from(frame.code), frame.reason),
                        None => "no close frame".to_string(),
                    };
                    return Err(LiveError::RemoteClosed(detail));
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
                    debug!("Skipping control frame");
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.close(None).await {
            debug!("WebSocket close: {}", e);
        }
    }
}

//! Coordinate sinks
//!
//! The driver hands every emitted coordinate to a [`CoordinateSink`]. Every
//! network sink carries the same JSON object:
//!
//! ```text
//! {"lat":51.478,"lon":-0.001}
//! ```
//!
//! [`TcpJsonSink`] writes it as one line over plain TCP, [`WebSocketSink`]
//! as one text frame over a persistent WebSocket, and [`HttpPostSink`] as
//! the body of one POST request per coordinate.

use async_trait::async_trait;
use futures_util::{FutureExt, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::math::wrap_longitude;
use crate::types::GeoCoordinate;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Transport closed")]
    Closed,
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        TransportError::WebSocket(Box::new(err))
    }
}

/// One coordinate on the wire, rounded to 3 decimal places
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoordinateMessage {
    pub lat: f64,
    pub lon: f64,
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

impl From<GeoCoordinate> for CoordinateMessage {
    fn from(coordinate: GeoCoordinate) -> Self {
        Self {
            lat: round3(coordinate.latitude),
            // Rounding can push -179.9996 onto -180
            lon: wrap_longitude(round3(coordinate.longitude)),
        }
    }
}

impl CoordinateMessage {
    pub fn to_json_line(&self) -> Result<String, TransportError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Asynchronous consumer of coordinate messages
#[async_trait]
pub trait CoordinateSink: Send {
    async fn send(&mut self, message: &CoordinateMessage) -> Result<(), TransportError>;

    /// Flushes and releases the connection at shutdown
    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[async_trait]
impl<K: CoordinateSink + ?Sized> CoordinateSink for Box<K> {
    async fn send(&mut self, message: &CoordinateMessage) -> Result<(), TransportError> {
        (**self).send(message).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        (**self).close().await
    }
}

/// Logs coordinates instead of sending them anywhere
#[derive(Debug, Default)]
pub struct LogSink {
    sent: u64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }
}

#[async_trait]
impl CoordinateSink for LogSink {
    async fn send(&mut self, message: &CoordinateMessage) -> Result<(), TransportError> {
        self.sent += 1;
        info!(lat = message.lat, lon = message.lon, "Coordinate");
        Ok(())
    }
}

/// Forwards coordinates into a tokio channel
///
/// A bounded channel applies backpressure: once it is full, `send` waits
/// until the receiver catches up.
#[derive(Debug)]
pub struct ChannelSink {
    sender: mpsc::Sender<CoordinateMessage>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<CoordinateMessage>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl CoordinateSink for ChannelSink {
    async fn send(&mut self, message: &CoordinateMessage) -> Result<(), TransportError> {
        self.sender
            .send(*message)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// Newline-delimited JSON over TCP
///
/// Connects on the first send and reconnects on the next send after a write
/// failure.
#[derive(Debug)]
pub struct TcpJsonSink {
    address: String,
    stream: Option<TcpStream>,
}

impl TcpJsonSink {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            stream: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn connect(&self) -> Result<TcpStream, TransportError> {
        let stream = TcpStream::connect(&self.address).await?;
        stream.set_nodelay(true)?;
        info!(address = %self.address, "Connected to relay");
        Ok(stream)
    }
}

#[async_trait]
impl CoordinateSink for TcpJsonSink {
    async fn send(&mut self, message: &CoordinateMessage) -> Result<(), TransportError> {
        let line = message.to_json_line()?;

        // The stream is only put back once the whole line is written, so a
        // send cancelled mid-line leaves no half-written connection behind
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => self.connect().await?,
        };
        if let Err(e) = stream.write_all(line.as_bytes()).await {
            warn!(address = %self.address, error = %e, "Relay write failed, will reconnect");
            return Err(e.into());
        }
        self.stream = Some(stream);

        debug!(lat = message.lat, lon = message.lon, "Sent coordinate");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
            info!(address = %self.address, "Relay connection closed");
        }
        Ok(())
    }
}

type RelaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// JSON text frames over a persistent WebSocket
///
/// Connects on the first send. Frames from the relay are drained without
/// waiting before each send; a close frame or a failed send drops the
/// connection and the next send reconnects.
pub struct WebSocketSink {
    url: String,
    socket: Option<RelaySocket>,
}

impl WebSocketSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            socket: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    async fn connect(&self) -> Result<RelaySocket, TransportError> {
        let (socket, response) = connect_async(self.url.as_str()).await?;
        info!(url = %self.url, status = %response.status(), "Connected to relay");
        Ok(socket)
    }
}

/// Handles whatever the relay has already sent, without blocking
fn drain_incoming(socket: &mut RelaySocket) -> Result<(), TransportError> {
    while let Some(frame) = socket.next().now_or_never() {
        match frame {
            None | Some(Ok(Message::Close(_))) => return Err(TransportError::Closed),
            Some(Ok(frame)) => debug!(len = frame.len(), "Ignoring relay frame"),
            Some(Err(e)) => return Err(e.into()),
        }
    }
    Ok(())
}

#[async_trait]
impl CoordinateSink for WebSocketSink {
    async fn send(&mut self, message: &CoordinateMessage) -> Result<(), TransportError> {
        let text = serde_json::to_string(message)?;

        let mut socket = match self.socket.take() {
            Some(socket) => socket,
            None => self.connect().await?,
        };
        if let Err(e) = drain_incoming(&mut socket) {
            warn!(url = %self.url, error = %e, "Relay went away, will reconnect");
            return Err(e);
        }
        if let Err(e) = socket.send(Message::Text(text)).await {
            warn!(url = %self.url, error = %e, "Relay send failed, will reconnect");
            return Err(e.into());
        }
        self.socket = Some(socket);

        debug!(lat = message.lat, lon = message.lon, "Sent coordinate");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut socket) = self.socket.take() {
            socket.close(None).await?;
            info!(url = %self.url, "Relay connection closed");
        }
        Ok(())
    }
}

/// One JSON POST per coordinate
///
/// A non-success status is reported as an error; the sample is dropped like
/// any other failed send.
#[derive(Debug, Clone)]
pub struct HttpPostSink {
    url: String,
    client: reqwest::Client,
}

impl HttpPostSink {
    pub fn new(url: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl CoordinateSink for HttpPostSink {
    async fn send(&mut self, message: &CoordinateMessage) -> Result<(), TransportError> {
        let response = self.client.post(&self.url).json(message).send().await?;
        let status = response.status();
        response.error_for_status()?;
        debug!(lat = message.lat, lon = message.lon, %status, "Posted coordinate");
        Ok(())
    }
}

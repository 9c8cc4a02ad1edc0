//! Transport adapters for the relay core.
//!
//! - [`split_axum`] wraps the server-side socket accepted from the telephony
//!   provider.
//! - [`split_tungstenite`] wraps the client stream dialed to the realtime
//!   endpoint.
//! - [`memory_connection`] is an in-process pair for embedding and tests.
//!
//! Ping/pong frames are answered by the underlying WebSocket libraries and are
//! never surfaced to the pumps. Binary frames are not part of either protocol
//! and are dropped here.

use async_trait::async_trait;
use axum::extract::ws::{Message as AxumMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tracing::debug;

use super::base::{CallConnection, FrameSink, FrameSource, RelayError, RelayResult};

/// Buffered frames per direction for in-memory connections.
const MEMORY_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Axum (server side)
// =============================================================================

/// Read half of an accepted axum WebSocket.
pub struct AxumSource {
    inner: SplitStream<WebSocket>,
}

/// Write half of an accepted axum WebSocket.
pub struct AxumSink {
    inner: SplitSink<WebSocket, AxumMessage>,
}

/// Split an accepted axum WebSocket into a relay connection.
pub fn split_axum(socket: WebSocket) -> CallConnection {
    let (sink, source) = socket.split();
    CallConnection::new(
        Box::new(AxumSource { inner: source }),
        Box::new(AxumSink { inner: sink }),
    )
}

#[async_trait]
impl FrameSource for AxumSource {
    async fn next_frame(&mut self) -> RelayResult<Option<String>> {
        loop {
            match self.inner.next().await {
                Some(Ok(AxumMessage::Text(text))) => return Ok(Some(text.as_str().to_owned())),
                Some(Ok(AxumMessage::Binary(data))) => {
                    debug!("Dropping binary frame from telephony: {} bytes", data.len());
                }
                Some(Ok(AxumMessage::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(RelayError::Transport(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl FrameSink for AxumSink {
    async fn send_frame(&mut self, frame: String) -> RelayResult<()> {
        self.inner
            .send(AxumMessage::Text(frame.into()))
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))
    }

    async fn close(&mut self) -> RelayResult<()> {
        self.inner
            .close()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))
    }
}

// =============================================================================
// tokio-tungstenite (client side)
// =============================================================================

/// Read half of a tokio-tungstenite stream.
pub struct TungsteniteSource<S> {
    inner: SplitStream<WebSocketStream<S>>,
}

/// Write half of a tokio-tungstenite stream.
pub struct TungsteniteSink<S> {
    inner: SplitSink<WebSocketStream<S>, WsMessage>,
}

/// Split a tokio-tungstenite stream into a relay connection.
pub fn split_tungstenite<S>(stream: WebSocketStream<S>) -> CallConnection
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, source) = stream.split();
    CallConnection::new(
        Box::new(TungsteniteSource { inner: source }),
        Box::new(TungsteniteSink { inner: sink }),
    )
}

fn map_tungstenite_error(e: tungstenite::Error) -> RelayError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            RelayError::ConnectionClosed
        }
        other => RelayError::Transport(other.to_string()),
    }
}

#[async_trait]
impl<S> FrameSource for TungsteniteSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn next_frame(&mut self) -> RelayResult<Option<String>> {
        loop {
            match self.inner.next().await {
                Some(Ok(WsMessage::Text(text))) => return Ok(Some(text.as_str().to_owned())),
                Some(Ok(WsMessage::Binary(data))) => {
                    debug!("Dropping binary frame from realtime endpoint: {} bytes", data.len());
                }
                Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return match map_tungstenite_error(e) {
                        RelayError::ConnectionClosed => Ok(None),
                        other => Err(other),
                    };
                }
            }
        }
    }
}

#[async_trait]
impl<S> FrameSink for TungsteniteSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_frame(&mut self, frame: String) -> RelayResult<()> {
        self.inner
            .send(WsMessage::Text(frame.into()))
            .await
            .map_err(map_tungstenite_error)
    }

    async fn close(&mut self) -> RelayResult<()> {
        match self.inner.close().await.map_err(map_tungstenite_error) {
            Err(RelayError::ConnectionClosed) => Ok(()),
            other => other,
        }
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// Relay-side read half of an in-memory connection.
pub struct MemorySource {
    rx: mpsc::Receiver<RelayResult<String>>,
}

/// Relay-side write half of an in-memory connection.
pub struct MemorySink {
    tx: Option<mpsc::Sender<String>>,
}

/// The far end of an in-memory connection.
///
/// Frames passed to [`MemoryPeer::send`] arrive at the relay's source; frames
/// the relay sends are read back with [`MemoryPeer::recv`].
pub struct MemoryPeer {
    tx: Option<mpsc::Sender<RelayResult<String>>>,
    rx: mpsc::Receiver<String>,
}

/// Create an in-memory connection and the peer that drives it.
pub fn memory_connection() -> (CallConnection, MemoryPeer) {
    let (inbound_tx, inbound_rx) = mpsc::channel(MEMORY_CHANNEL_CAPACITY);
    let (outbound_tx, outbound_rx) = mpsc::channel(MEMORY_CHANNEL_CAPACITY);
    let connection = CallConnection::new(
        Box::new(MemorySource { rx: inbound_rx }),
        Box::new(MemorySink {
            tx: Some(outbound_tx),
        }),
    );
    let peer = MemoryPeer {
        tx: Some(inbound_tx),
        rx: outbound_rx,
    };
    (connection, peer)
}

impl MemoryPeer {
    /// Deliver a text frame to the relay. Returns `false` if the relay side
    /// is gone or the peer has hung up.
    pub async fn send(&self, frame: impl Into<String>) -> bool {
        match &self.tx {
            Some(tx) => tx.send(Ok(frame.into())).await.is_ok(),
            None => false,
        }
    }

    /// Make the relay's next read fail with a transport error.
    pub async fn fail(&self, reason: impl Into<String>) -> bool {
        match &self.tx {
            Some(tx) => tx
                .send(Err(RelayError::Transport(reason.into())))
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Close the peer's sending direction; the relay reads end-of-stream once
    /// buffered frames are drained.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }

    /// Next frame sent by the relay, or `None` once the relay closed or
    /// dropped its write half.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Frame already sent by the relay, without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_frame(&mut self) -> RelayResult<Option<String>> {
        match self.rx.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_frame(&mut self, frame: String) -> RelayResult<()> {
        let tx = self.tx.as_ref().ok_or(RelayError::ConnectionClosed)?;
        tx.send(frame)
            .await
            .map_err(|_| RelayError::ConnectionClosed)
    }

    async fn close(&mut self) -> RelayResult<()> {
        self.tx = None;
        Ok(())
    }
}

/// Write half whose sends and close never complete, like a peer that stopped
/// reading. Each send attempt is signalled through the returned `Notify`.
#[cfg(test)]
pub(crate) struct StalledSink {
    entered: std::sync::Arc<tokio::sync::Notify>,
}

#[cfg(test)]
impl StalledSink {
    pub(crate) fn new() -> (Self, std::sync::Arc<tokio::sync::Notify>) {
        let entered = std::sync::Arc::new(tokio::sync::Notify::new());
        (
            Self {
                entered: entered.clone(),
            },
            entered,
        )
    }
}

#[cfg(test)]
#[async_trait]
impl FrameSink for StalledSink {
    async fn send_frame(&mut self, _frame: String) -> RelayResult<()> {
        self.entered.notify_one();
        std::future::pending().await
    }

    async fn close(&mut self) -> RelayResult<()> {
        std::future::pending().await
    }
}

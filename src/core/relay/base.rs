//! Base traits and types for the call relay.
//!
//! This module defines the transport seam the relay core is written against and
//! the error taxonomy shared by both pumps.
//!
//! # Transport Seam
//!
//! A connection is split into a [`FrameSource`] (read half) and a [`FrameSink`]
//! (write half). The core only ever sees text frames: control frames are handled
//! by the transport adapters, so the pumps never deal with ping/pong or binary
//! framing.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while relaying a call.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The peer closed the connection
    #[error("Connection closed")]
    ConnectionClosed,

    /// Reading from or writing to a connection failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// An outbound frame could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A structurally valid frame carried an unexpected payload
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Dialing the realtime endpoint failed
    #[error("Upstream connection failed: {0}")]
    UpstreamConnect(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl RelayError {
    /// Whether this error ends the pump that observed it.
    ///
    /// Only connection-level failures are fatal. A bad frame or a send that could
    /// not be serialized is skipped and the pump keeps reading.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::ConnectionClosed | RelayError::Transport(_) | RelayError::UpstreamConnect(_)
        )
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Serialization(e.to_string())
    }
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

// =============================================================================
// Transport Traits
// =============================================================================

/// Read half of a full-duplex message connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next text frame.
    ///
    /// Returns `Ok(None)` once the peer has closed the connection.
    async fn next_frame(&mut self) -> RelayResult<Option<String>>;
}

/// Write half of a full-duplex message connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    async fn send_frame(&mut self, frame: String) -> RelayResult<()>;

    /// Close the connection.
    ///
    /// Best-effort: the peer may already be gone, so callers log a failed close
    /// rather than acting on it.
    async fn close(&mut self) -> RelayResult<()>;
}

/// One established connection, split into its two halves.
pub struct CallConnection {
    pub source: Box<dyn FrameSource>,
    pub sink: Box<dyn FrameSink>,
}

impl CallConnection {
    pub fn new(source: Box<dyn FrameSource>, sink: Box<dyn FrameSink>) -> Self {
        Self { source, sink }
    }
}

impl fmt::Debug for CallConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallConnection").finish_non_exhaustive()
    }
}

// =============================================================================
// Session Outcome
// =============================================================================

/// Relay direction, named after the connection a pump reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Telephony → AI
    Telephony,
    /// AI → Telephony
    Ai,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Telephony => write!(f, "telephony"),
            Direction::Ai => write!(f, "ai"),
        }
    }
}

/// Why a pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpExit {
    /// The connection the pump reads from was closed by the peer
    PeerClosed,
    /// Reading from or writing to a connection failed
    TransportFailed(String),
    /// The session supervisor stopped the pump
    Cancelled,
}

impl fmt::Display for PumpExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpExit::PeerClosed => write!(f, "peer closed"),
            PumpExit::TransportFailed(reason) => write!(f, "transport failed: {reason}"),
            PumpExit::Cancelled => write!(f, "cancelled"),
        }
    }
}

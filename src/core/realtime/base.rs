//! Shared types for the realtime session manager.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::core::record::{RecordError, VehicleRecord};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// The session-creation endpoint returned a non-success status
    #[error("Session creation failed with HTTP {status}: {body}")]
    SessionCreate { status: u16, body: String },

    /// Transport failure while calling the REST endpoint
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Send attempted while the socket is not open
    #[error("Not connected")]
    NotConnected,

    /// Tool arguments could not be decoded into a record
    #[error("Malformed tool payload: {0}")]
    MalformedToolPayload(#[from] RecordError),

    /// WebSocket handshake or transport failure
    #[error("WebSocket error: {0}")]
    Socket(String),

    /// The socket was closed while sending
    #[error("WebSocket closed")]
    SocketClosed,
}

impl From<tokio_tungstenite::tungstenite::Error> for RealtimeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => RealtimeError::SocketClosed,
            other => RealtimeError::Socket(other.to_string()),
        }
    }
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Connection State
// =============================================================================

/// Socket lifecycle. There is no reconnection: once Disconnected after a
/// drop, a new session must be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

// =============================================================================
// Callbacks
// =============================================================================

/// Receives free-text progress, error and transcript strings.
pub type StatusCallback =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Receives each whole-record replacement produced by the save tool.
pub type RecordUpdateCallback =
    Arc<dyn Fn(VehicleRecord) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

//! Error taxonomy for the connection layer.
//!
//! Only errors from caller-invoked operations (`connect`, `send`,
//! `subscribe`) are ever returned. Transport failures seen by the
//! background loops feed the reconnection path, and decode failures are
//! logged and dropped by the router.
//!
//! Exhausting the reconnection budget has no error value of its own: it is
//! observable as the manager settling at `ConnectionState::Disconnected`.

/// Errors produced by the connection manager and session service.
///
/// The type is `Clone + Eq` so it can be carried inside
/// [`ConnectionState::Failed`](crate::connection::ConnectionState::Failed)
/// and compared in state assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The endpoint URL is malformed or uses an unsupported scheme.
    InvalidEndpoint(String),
    /// The operation requires a live connection.
    NotConnected,
    /// Transport or authorization failure during the handshake.
    HandshakeFailed(String),
    /// Transport write failure.
    SendFailed(String),
    /// A live connection dropped (read error, server close, heartbeat failure).
    ConnectionLost(String),
    /// An inbound frame could not be decoded.
    DecodeFailed(String),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEndpoint(msg) => write!(f, "Invalid endpoint: {msg}"),
            Self::NotConnected => write!(f, "Not connected"),
            Self::HandshakeFailed(msg) => write!(f, "Handshake failed: {msg}"),
            Self::SendFailed(msg) => write!(f, "Send failed: {msg}"),
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {msg}"),
            Self::DecodeFailed(msg) => write!(f, "Decode failed: {msg}"),
        }
    }
}

impl std::error::Error for ConnectionError {}

/// Convenience alias for results carrying a [`ConnectionError`].
pub type Result<T, E = ConnectionError> = std::result::Result<T, E>;

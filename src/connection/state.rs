//! Connection state machine.
//!
//! Every state change the manager makes goes through [`transition`], a
//! pure and total function: any `(state, event)` pair produces one of the
//! five states, and events that do not apply leave the state unchanged.

use crate::error::ConnectionError;

/// Connection state for the manager.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection and no pending retry.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Connected; receive and heartbeat loops are running.
    Connected,
    /// Explicit teardown in progress.
    Disconnecting,
    /// The last handshake or live connection failed.
    ///
    /// Not terminal: an automatic retry moves back to `Connecting`, and
    /// exhaustion or cancellation moves to `Disconnected`.
    Failed(ConnectionError),
}

impl ConnectionState {
    /// Returns `true` when connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Short lowercase name, for logs and status lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Failed(_) => "failed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(err) => write!(f, "failed ({err})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateEvent {
    /// A connect was requested, explicitly or by a retry timer.
    Connect,
    /// The handshake completed.
    Established,
    /// The handshake failed.
    HandshakeFailed(ConnectionError),
    /// A live connection dropped.
    ConnectionLost(ConnectionError),
    /// The reconnection budget is spent.
    RetriesExhausted,
    /// An explicit disconnect was requested.
    Disconnect,
    /// The stream has been closed.
    Closed,
}

/// Compute the state that follows `state` on `event`.
pub fn transition(state: &ConnectionState, event: StateEvent) -> ConnectionState {
    use ConnectionState as S;
    use StateEvent as E;

    match (state, event) {
        (S::Disconnected | S::Failed(_) | S::Connecting, E::Connect) => S::Connecting,
        (S::Connecting, E::Established) => S::Connected,
        (S::Connecting, E::HandshakeFailed(err)) => S::Failed(err),
        (S::Connected, E::ConnectionLost(err)) => S::Failed(err),
        (S::Failed(_), E::RetriesExhausted) => S::Disconnected,
        (S::Disconnected, E::Disconnect) => S::Disconnected,
        (_, E::Disconnect) => S::Disconnecting,
        (_, E::Closed) => S::Disconnected,
        (current, _) => current.clone(),
    }
}

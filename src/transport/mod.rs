//! Transport capability consumed by the connection manager.
//!
//! The manager never talks to sockets directly. It is handed a
//! [`Connector`] that performs the upgrade handshake and returns split
//! writer/reader halves, mirroring the `(WsWriter, WsReader)` pair that
//! [`crate::ws::connect`] produces.
//!
//! ```text
//! Connector::connect(url, headers)
//!     ├── Box<dyn FrameSink>    (send / close, owned by the manager's writer slot)
//!     └── Box<dyn FrameSource>  (recv, owned by the receive loop)
//! ```
//!
//! Two implementations ship with the crate:
//!
//! - [`crate::ws::WsConnector`] - tokio-tungstenite over TCP/TLS
//! - [`mock::MockConnector`] - in-memory duplex used by tests and demos

pub mod mock;

use async_trait::async_trait;

/// A single WebSocket-level frame, in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Pong frame with payload.
    Pong(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// A data frame republished verbatim on the manager's inbound stream.
///
/// Control frames (ping/pong/close) are handled by the receive loop and
/// never reach subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl InboundFrame {
    /// Frame payload as text, if it is (or decodes as) UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(data) => std::str::from_utf8(data).ok(),
        }
    }
}

/// Write half of an established connection.
#[async_trait]
pub trait FrameSink: Send + std::fmt::Debug {
    /// Hand a frame to the transport.
    ///
    /// Completes once the frame is written, not when the peer acknowledges it.
    async fn send(&mut self, frame: Frame) -> anyhow::Result<()>;

    /// Flush and close the write half.
    async fn close(&mut self) -> anyhow::Result<()>;
}

/// Read half of an established connection.
#[async_trait]
pub trait FrameSource: Send + std::fmt::Debug {
    /// Receive the next frame, returning `None` when the stream ends.
    async fn recv(&mut self) -> Option<anyhow::Result<Frame>>;
}

/// Split halves returned by a successful handshake.
pub type Duplex = (Box<dyn FrameSink>, Box<dyn FrameSource>);

/// Opens duplex connections.
///
/// Implementations must be cheap to share: the manager keeps one behind an
/// `Arc` and calls `connect` for the initial attempt and every retry.
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// Perform the upgrade handshake against `url`, adding each
    /// `(name, value)` header to the request.
    async fn connect(&self, url: &str, headers: &[(&str, &str)]) -> anyhow::Result<Duplex>;
}

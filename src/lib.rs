//! Syncwire - real-time session layer over a single WebSocket.
//!
//! Keeps one long-lived, authenticated connection to a backend and
//! multiplexes typed event categories (project, chat, file, terminal,
//! collaboration, system) over it, recovering from drops on its own.
//!
//! # Architecture
//!
//! - **SessionService** - application facade: configuration, auth,
//!   commands, merged status, per-category event streams
//! - **ConnectionManager** - connection state machine, heartbeat and
//!   reconnection with exponential backoff
//! - **EventRouter** - two-phase decode of inbound frames and per-category
//!   publication
//! - **Transport** - the `Connector` seam, with a tokio-tungstenite
//!   implementation in [`ws`] and an in-memory one in [`transport::mock`]
//!
//! # Modules
//!
//! - [`session`] - session service
//! - [`connection`] - connection manager, state machine and backoff
//! - [`router`] / [`events`] - inbound decoding and routing
//! - [`command`] - outbound commands
//! - [`config`] - configuration loading/saving

pub mod command;
pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod events;
pub mod router;
pub mod session;
pub mod transport;
pub mod ws;

// Re-export commonly used types
pub use command::{MessagePayload, OutboundCommand, Topic};
pub use config::Config;
pub use connection::{ConnectionManager, ConnectionOptions, ConnectionState, ReconnectPolicy};
pub use error::ConnectionError;
pub use events::{EventCategory, TypedEvent};
pub use router::{EventRouter, RouteOutcome};
pub use session::{AppLifecycle, SessionConfig, SessionService, SessionStatus};
pub use transport::{Connector, Frame, InboundFrame};
pub use ws::WsConnector;

//! In-memory transport.
//!
//! [`MockConnector`] hands out connections whose far end is a [`MockPeer`]
//! controlled by the caller. Tests use it to script handshake refusals,
//! push inbound frames, observe outbound frames and inject read/write
//! failures without a network.
//!
//! ```ignore
//! let (connector, mut peers) = MockConnector::new();
//! let manager = ConnectionManager::new(Arc::new(connector.clone()), options);
//! manager.connect("ws://test/ws", None).await?;
//! let mut peer = peers.next().await.expect("peer");
//! peer.push_text(r#"{"type":"heartbeat","timestamp":"2024-01-01T00:00:00Z"}"#);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Connector, Duplex, Frame, FrameSink, FrameSource};

/// Handshake bookkeeping shared between clones of a connector.
#[derive(Debug, Default)]
struct ConnectorState {
    /// Planned outcomes for upcoming handshakes (`Err` refuses with the message).
    planned: VecDeque<Result<(), String>>,
    /// Refuse every handshake once the plan is exhausted.
    refuse_all: bool,
    /// Number of handshakes attempted.
    attempts: usize,
    /// URL of the most recent handshake.
    last_url: Option<String>,
    /// Headers of the most recent handshake.
    last_headers: Vec<(String, String)>,
}

/// Connector producing in-memory connections.
#[derive(Debug, Clone)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
    peers_tx: mpsc::UnboundedSender<MockPeer>,
}

/// Stream of far ends, one per accepted handshake.
#[derive(Debug)]
pub struct MockPeers {
    rx: mpsc::UnboundedReceiver<MockPeer>,
}

impl MockPeers {
    /// Wait for the next accepted connection.
    pub async fn next(&mut self) -> Option<MockPeer> {
        self.rx.recv().await
    }

    /// Take an already-accepted connection without waiting.
    pub fn try_next(&mut self) -> Option<MockPeer> {
        self.rx.try_recv().ok()
    }
}

impl MockConnector {
    /// Create a connector and the stream of peers it will accept.
    pub fn new() -> (Self, MockPeers) {
        let (peers_tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            state: Arc::new(Mutex::new(ConnectorState::default())),
            peers_tx,
        };
        (connector, MockPeers { rx })
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ConnectorState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Refuse the next `count` handshakes.
    pub fn refuse_next(&self, count: usize, reason: &str) {
        self.with_state(|s| {
            for _ in 0..count {
                s.planned.push_back(Err(reason.to_string()));
            }
        });
    }

    /// Accept the next handshake regardless of `refuse_all`.
    pub fn accept_next(&self) {
        self.with_state(|s| s.planned.push_back(Ok(())));
    }

    /// Refuse (or stop refusing) every unplanned handshake.
    pub fn set_refuse_all(&self, refuse: bool) {
        self.with_state(|s| s.refuse_all = refuse);
    }

    /// Number of handshakes attempted so far.
    pub fn attempts(&self) -> usize {
        self.with_state(|s| s.attempts)
    }

    /// URL passed to the most recent handshake.
    pub fn last_url(&self) -> Option<String> {
        self.with_state(|s| s.last_url.clone())
    }

    /// Headers passed to the most recent handshake.
    pub fn last_headers(&self) -> Vec<(String, String)> {
        self.with_state(|s| s.last_headers.clone())
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str, headers: &[(&str, &str)]) -> anyhow::Result<Duplex> {
        let outcome = self.with_state(|s| {
            s.attempts += 1;
            s.last_url = Some(url.to_string());
            s.last_headers = headers
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect();
            match s.planned.pop_front() {
                Some(planned) => planned,
                None if s.refuse_all => Err("connection refused".to_string()),
                None => Ok(()),
            }
        });

        if let Err(reason) = outcome {
            return Err(anyhow!("mock handshake refused: {reason}"));
        }

        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
        let (to_server_tx, to_server_rx) = mpsc::unbounded_channel();
        let fail_writes = Arc::new(AtomicBool::new(false));

        let peer = MockPeer {
            to_client: to_client_tx,
            from_client: to_server_rx,
            fail_writes: Arc::clone(&fail_writes),
        };
        // Nobody waiting on peers is fine; the connection still works.
        let _ = self.peers_tx.send(peer);

        let sink = MockSink {
            tx: to_server_tx,
            fail_writes,
            closed: false,
        };
        let source = MockSource { rx: to_client_rx };
        Ok((Box::new(sink), Box::new(source)))
    }
}

/// Far end of an in-memory connection.
///
/// Dropping the peer ends the client's read stream, which the manager
/// treats as a dropped connection.
#[derive(Debug)]
pub struct MockPeer {
    to_client: mpsc::UnboundedSender<anyhow::Result<Frame>>,
    from_client: mpsc::UnboundedReceiver<Frame>,
    fail_writes: Arc<AtomicBool>,
}

impl MockPeer {
    /// Deliver a text frame to the client.
    pub fn push_text(&self, text: &str) {
        let _ = self.to_client.send(Ok(Frame::Text(text.to_string())));
    }

    /// Deliver an arbitrary frame to the client.
    pub fn push(&self, frame: Frame) {
        let _ = self.to_client.send(Ok(frame));
    }

    /// Make the client's next read fail.
    pub fn fail_read(&self, reason: &str) {
        let _ = self.to_client.send(Err(anyhow!("mock read error: {reason}")));
    }

    /// Make every client write fail from now on.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Wait for the next frame written by the client.
    ///
    /// Returns `None` once the client side has been dropped.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Take a frame written by the client without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.from_client.try_recv().ok()
    }

    /// Wait for the next text frame, skipping control frames.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.from_client.recv().await? {
                Frame::Text(text) => return Some(text),
                _ => continue,
            }
        }
    }
}

#[derive(Debug)]
struct MockSink {
    tx: mpsc::UnboundedSender<Frame>,
    fail_writes: Arc<AtomicBool>,
    closed: bool,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, frame: Frame) -> anyhow::Result<()> {
        if self.closed {
            anyhow::bail!("mock sink closed");
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("mock write error");
        }
        self.tx
            .send(frame)
            .map_err(|e| anyhow!("mock peer gone: {e}"))
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[derive(Debug)]
struct MockSource {
    rx: mpsc::UnboundedReceiver<anyhow::Result<Frame>>,
}

#[async_trait]
impl FrameSource for MockSource {
    async fn recv(&mut self) -> Option<anyhow::Result<Frame>> {
        self.rx.recv().await
    }
}

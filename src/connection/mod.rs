//! Connection manager.
//!
//! Owns exactly one duplex connection at a time and everything that keeps
//! it alive: the state machine, the receive loop, the heartbeat loop and
//! automatic reconnection with exponential backoff.
//!
//! # Architecture
//!
//! ```text
//! ConnectionManager (cheap Clone, Arc<Inner>)
//!     ├── core: tokio Mutex      serializes connect / disconnect / failure handling
//!     ├── writer: tokio Mutex    single writer slot shared by send() and heartbeat
//!     ├── reconnect: std Mutex   attempt counter + pending retry timer
//!     ├── state: watch + broadcast   current value and every transition
//!     └── inbound: broadcast     raw text/binary frames, republished verbatim
//!
//! per connection (generation N):
//!     ├── receive loop   recv() until cancelled; failure → handle_failure(N)
//!     └── heartbeat loop ping every 30s;    failure → handle_failure(N)
//! ```
//!
//! # Reconnection
//!
//! Only failures of a connection that was live trigger retries; a failed
//! explicit `connect()` is returned to the caller and nothing is scheduled.
//! Failures are tagged with the connection generation, so the second of two
//! loops noticing the same drop is ignored rather than double-scheduling.
//! After `max_attempts` failed retries the manager settles at
//! `Disconnected` and waits for an explicit `connect()`.

pub mod backoff;
pub mod state;

pub use backoff::ReconnectPolicy;
pub use state::{transition, ConnectionState, StateEvent};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::constants::{
    CONNECT_TIMEOUT, HEARTBEAT_INTERVAL, INBOUND_CHANNEL_CAPACITY, STATE_CHANNEL_CAPACITY,
};
use crate::error::{ConnectionError, Result};
use crate::transport::{Connector, Frame, FrameSink, FrameSource, InboundFrame};
use crate::ws::validate_endpoint;

use backoff::ReconnectionState;

/// Upper bound on the best-effort close during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Tuning knobs for a [`ConnectionManager`].
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    /// Interval between heartbeat pings.
    pub heartbeat_interval: Duration,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Reconnection backoff.
    pub policy: ReconnectPolicy,
    /// Buffer size of the inbound frame broadcast.
    pub inbound_capacity: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            connect_timeout: CONNECT_TIMEOUT,
            policy: ReconnectPolicy::default(),
            inbound_capacity: INBOUND_CHANNEL_CAPACITY,
        }
    }
}

/// Where to connect.
#[derive(Debug, Clone)]
struct Target {
    url: String,
    token: Option<String>,
}

/// Core state mutated under the serialization lock.
#[derive(Debug, Default)]
struct Core {
    /// Bumped on every established connection and every explicit teardown.
    generation: u64,
    /// Target of the last connect, reused by retries.
    target: Option<Target>,
    /// Cancellation for the running receive/heartbeat loops.
    live: Option<CancellationToken>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    options: ConnectionOptions,
    core: tokio::sync::Mutex<Core>,
    writer: tokio::sync::Mutex<Option<Box<dyn FrameSink>>>,
    reconnect: Mutex<ReconnectionState>,
    state_tx: watch::Sender<ConnectionState>,
    transitions_tx: broadcast::Sender<ConnectionState>,
    inbound_tx: broadcast::Sender<InboundFrame>,
}

/// Handle to a managed connection.
///
/// Clones share the same connection. Call [`disconnect`](Self::disconnect)
/// to stop background tasks; dropping the handles alone does not.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &*self.inner.state_tx.borrow())
            .field("connector", &self.inner.connector)
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager in the `Disconnected` state.
    pub fn new(connector: Arc<dyn Connector>, options: ConnectionOptions) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (transitions_tx, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        let (inbound_tx, _) = broadcast::channel(options.inbound_capacity.max(1));

        Self {
            inner: Arc::new(Inner {
                connector,
                options,
                core: tokio::sync::Mutex::new(Core::default()),
                writer: tokio::sync::Mutex::new(None),
                reconnect: Mutex::new(ReconnectionState::default()),
                state_tx,
                transitions_tx,
                inbound_tx,
            }),
        }
    }

    /// Connect to `url`, sending `Authorization: Bearer <token>` when a
    /// token is given.
    ///
    /// No-op when already connected. Cancels any pending automatic retry.
    /// A handshake failure leaves the manager in `Failed` and is not retried.
    ///
    /// # Errors
    ///
    /// `InvalidEndpoint` for a malformed URL (state unchanged),
    /// `HandshakeFailed` when the handshake fails or times out.
    pub async fn connect(&self, url: &str, auth_token: Option<&str>) -> Result<()> {
        validate_endpoint(url)?;

        self.inner.reconnect().cancel_retry();
        let mut core = self.inner.core.lock().await;

        if self.inner.current_state().is_connected() {
            log::debug!("[Connection] Already connected, ignoring connect");
            return Ok(());
        }

        // A retry may have been scheduled while we waited for the lock.
        self.inner.reconnect().cancel_retry();

        let target = Target {
            url: url.to_string(),
            token: auth_token.map(str::to_string),
        };
        core.target = Some(target.clone());

        log::info!("[Connection] Connecting to {}", target.url);
        self.inner.establish(&mut core, &target).await
    }

    /// Disconnect and cancel any pending retry.
    ///
    /// Idempotent and infallible: closing the stream is best-effort.
    pub async fn disconnect(&self) {
        self.inner.reconnect().cancel_retry();
        let mut core = self.inner.core.lock().await;
        self.inner.reconnect().cancel_retry();

        // Stale failure reports and retries check the generation.
        core.generation += 1;

        if self.inner.current_state() == ConnectionState::Disconnected && core.live.is_none() {
            log::debug!("[Connection] Already disconnected");
            return;
        }

        log::info!("[Connection] Disconnecting");
        self.inner.apply(StateEvent::Disconnect);
        self.inner.teardown(&mut core).await;
        self.inner.reconnect().reset();
        self.inner.apply(StateEvent::Closed);
    }

    /// Write a frame to the live connection.
    ///
    /// Returns once the frame is handed to the transport. A send failure
    /// does not trigger reconnection; the receive side notices real drops.
    ///
    /// # Errors
    ///
    /// `NotConnected` when not connected (nothing is written),
    /// `SendFailed` on a transport error.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        if !self.inner.current_state().is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        self.inner.write(frame).await
    }

    /// Write a text frame to the live connection.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send(Frame::Text(text.to_string())).await
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.inner.current_state()
    }

    /// Watch the current state (latest value only).
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribe to every state transition, in order.
    pub fn subscribe_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.inner.transitions_tx.subscribe()
    }

    /// Subscribe to raw inbound text/binary frames.
    pub fn subscribe_inbound(&self) -> broadcast::Receiver<InboundFrame> {
        self.inner.inbound_tx.subscribe()
    }

    /// Automatic reconnection attempts since the last successful connection.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect().attempts
    }

    /// When the most recent failure happened, if any since the last success.
    pub fn last_failure(&self) -> Option<Instant> {
        self.inner.reconnect().last_failure
    }

    /// Returns `true` while an automatic retry is scheduled.
    pub fn retry_pending(&self) -> bool {
        self.inner.reconnect().retry_pending()
    }

    /// Options this manager was built with.
    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }
}

impl Inner {
    fn reconnect(&self) -> MutexGuard<'_, ReconnectionState> {
        self.reconnect.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Feed an event through the state machine and publish any change.
    ///
    /// Callers hold the core lock.
    fn apply(&self, event: StateEvent) -> ConnectionState {
        let current = self.current_state();
        let next = transition(&current, event);
        if next != current {
            log::debug!("[Connection] {} -> {}", current, next);
            self.state_tx.send_replace(next.clone());
            let _ = self.transitions_tx.send(next.clone());
        }
        next
    }

    /// Perform the handshake and start the loops.
    async fn establish(self: &Arc<Self>, core: &mut Core, target: &Target) -> Result<()> {
        self.apply(StateEvent::Connect);

        let auth_header = target.token.as_ref().map(|t| format!("Bearer {t}"));
        let mut headers: Vec<(&str, &str)> = Vec::new();
        if let Some(value) = auth_header.as_deref() {
            headers.push(("Authorization", value));
        }

        let timeout = self.options.connect_timeout;
        let outcome =
            tokio::time::timeout(timeout, self.connector.connect(&target.url, &headers)).await;

        let (sink, source) = match outcome {
            Ok(Ok(duplex)) => duplex,
            Ok(Err(e)) => {
                let err = ConnectionError::HandshakeFailed(format!("{e:#}"));
                log::warn!("[Connection] {}", err);
                self.apply(StateEvent::HandshakeFailed(err.clone()));
                return Err(err);
            }
            Err(_) => {
                let err = ConnectionError::HandshakeFailed(format!(
                    "timed out after {}s",
                    timeout.as_secs()
                ));
                log::warn!("[Connection] {}", err);
                self.apply(StateEvent::HandshakeFailed(err.clone()));
                return Err(err);
            }
        };

        core.generation += 1;
        let generation = core.generation;
        *self.writer.lock().await = Some(sink);

        let cancel = CancellationToken::new();
        tokio::spawn(Arc::clone(self).receive_loop(generation, source, cancel.clone()));
        tokio::spawn(Arc::clone(self).heartbeat_loop(generation, cancel.clone()));
        core.live = Some(cancel);

        self.reconnect().reset();
        self.apply(StateEvent::Established);
        log::info!("[Connection] Connected (generation {})", generation);
        Ok(())
    }

    /// Stop the loops and close the stream.
    ///
    /// A write stuck in the transport holds the writer slot. Teardown gives
    /// up on it after [`CLOSE_TIMEOUT`]; the next connection replaces the
    /// sink once that write returns.
    async fn teardown(&self, core: &mut Core) {
        if let Some(cancel) = core.live.take() {
            cancel.cancel();
        }
        let sink = match tokio::time::timeout(CLOSE_TIMEOUT, self.writer.lock()).await {
            Ok(mut writer) => writer.take(),
            Err(_) => {
                log::warn!("[Connection] Writer busy, abandoning close");
                None
            }
        };
        if let Some(mut sink) = sink {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
        }
    }

    async fn write(&self, frame: Frame) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(ConnectionError::NotConnected);
        };
        sink.send(frame)
            .await
            .map_err(|e| ConnectionError::SendFailed(format!("{e:#}")))
    }

    /// Handle a mid-session failure reported by a loop of `generation`.
    async fn handle_failure(self: &Arc<Self>, generation: u64, reason: String) {
        let mut core = self.core.lock().await;
        if core.generation != generation || !self.current_state().is_connected() {
            log::debug!("[Connection] Ignoring stale failure: {}", reason);
            return;
        }

        log::warn!("[Connection] Connection lost: {}", reason);
        self.teardown(&mut core).await;
        self.apply(StateEvent::ConnectionLost(ConnectionError::ConnectionLost(
            reason,
        )));
        self.schedule_retry(&core);
    }

    /// Schedule the next automatic attempt, or give up.
    ///
    /// Called in the `Failed` state with the core lock held.
    fn schedule_retry(self: &Arc<Self>, core: &Core) {
        let policy = self.options.policy;
        let mut reconnect = self.reconnect();
        reconnect.last_failure = Some(Instant::now());

        if reconnect.attempts >= policy.max_attempts {
            // Detach the finishing retry task; nothing is pending any more.
            reconnect.retry = None;
            drop(reconnect);
            log::warn!(
                "[Connection] Giving up after {} reconnection attempts",
                policy.max_attempts
            );
            self.apply(StateEvent::RetriesExhausted);
            return;
        }

        reconnect.attempts += 1;
        let attempt = reconnect.attempts;
        let delay = policy.jittered_delay_for(attempt);
        let generation = core.generation;

        log::info!(
            "[Connection] Reconnecting in {:.1}s (attempt {}/{})",
            delay.as_secs_f32(),
            attempt,
            policy.max_attempts
        );

        let inner = Arc::clone(self);
        reconnect.schedule(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.retry(generation).await;
        }));
    }

    /// Fired by the retry timer: run the connect path again.
    async fn retry(self: &Arc<Self>, scheduled_generation: u64) {
        let mut core = self.core.lock().await;
        if core.generation != scheduled_generation
            || !matches!(self.current_state(), ConnectionState::Failed(_))
        {
            log::debug!("[Connection] Retry superseded");
            return;
        }
        let Some(target) = core.target.clone() else {
            return;
        };

        match self.establish(&mut core, &target).await {
            Ok(()) => log::info!("[Connection] Reconnected"),
            Err(e) => {
                log::debug!("[Connection] Retry failed: {}", e);
                self.schedule_retry(&core);
            }
        }
    }

    async fn receive_loop(
        self: Arc<Self>,
        generation: u64,
        mut source: Box<dyn FrameSource>,
        cancel: CancellationToken,
    ) {
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                next = source.recv() => next,
            };

            match next {
                Some(Ok(Frame::Text(text))) => self.publish(InboundFrame::Text(text)),
                Some(Ok(Frame::Binary(data))) => self.publish(InboundFrame::Binary(data)),
                Some(Ok(Frame::Ping(data))) => {
                    if let Err(e) = self.write(Frame::Pong(data)).await {
                        log::debug!("[Connection] Failed to answer ping: {}", e);
                    }
                }
                Some(Ok(Frame::Pong(_))) => log::trace!("[Connection] Pong received"),
                Some(Ok(Frame::Close { code, reason })) => {
                    let reason = format!("closed by server ({code}) {reason}");
                    self.handle_failure(generation, reason.trim_end().to_string())
                        .await;
                    return;
                }
                Some(Err(e)) => {
                    self.handle_failure(generation, format!("{e:#}")).await;
                    return;
                }
                None => {
                    self.handle_failure(generation, "stream ended".to_string())
                        .await;
                    return;
                }
            }
        }
    }

    async fn heartbeat_loop(self: Arc<Self>, generation: u64, cancel: CancellationToken) {
        let period = self.options.heartbeat_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.write(Frame::Ping(Vec::new())).await {
                self.handle_failure(generation, format!("heartbeat failed: {e}"))
                    .await;
                return;
            }
            log::trace!("[Connection] Heartbeat sent");
        }
    }

    fn publish(&self, frame: InboundFrame) {
        if self.inbound_tx.send(frame).is_err() {
            log::trace!("[Connection] No inbound subscribers, frame dropped");
        }
    }
}

//! Session service.
//!
//! The entry point applications use. Owns one [`ConnectionManager`] and one
//! [`EventRouter`], and adds everything that is about the session rather
//! than the socket:
//!
//! - endpoint and credential configuration
//! - in-band `authenticate` after every connect, including automatic
//!   reconnects
//! - typed commands and subscribe/unsubscribe helpers
//! - a merged [`SessionStatus`] that tells reconnecting apart from connecting
//! - reaction to the app moving between foreground and background
//!
//! Subscriptions are not remembered. After a reconnect the caller decides
//! what to subscribe to again.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::command::{OutboundCommand, Topic};
use crate::connection::{ConnectionManager, ConnectionOptions, ConnectionState};
use crate::constants::{CATEGORY_CHANNEL_CAPACITY, STATE_CHANNEL_CAPACITY};
use crate::error::{ConnectionError, Result};
use crate::events::{EventCategory, TypedEvent};
use crate::router::EventRouter;
use crate::transport::Connector;
use crate::ws::build_ws_url;

/// Everything a session needs to reach the backend.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// REST base URL; the socket endpoint is derived from it.
    pub endpoint: String,
    /// Bearer credential, sent at handshake and in-band.
    pub credential: Option<String>,
    /// Disconnect when the app goes to the background.
    pub disconnect_on_background: bool,
    /// Connection tuning.
    pub connection: ConnectionOptions,
}

impl SessionConfig {
    /// Config with default connection options.
    pub fn new(endpoint: impl Into<String>, credential: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            credential,
            disconnect_on_background: false,
            connection: ConnectionOptions::default(),
        }
    }

    /// The socket URL derived from [`endpoint`](Self::endpoint).
    pub fn ws_url(&self) -> String {
        build_ws_url(&self.endpoint)
    }
}

/// Connection status as shown to users.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionStatus {
    /// Not connected and not trying.
    #[default]
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Connecting again after a failure.
    Reconnecting {
        /// Attempts since the connection was lost, starting at 1.
        attempt: u32,
    },
    /// Live.
    Connected,
    /// The last attempt failed.
    Failed(String),
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Connected => f.write_str("connected"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Application visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycle {
    /// The app is visible.
    Foreground,
    /// The app was moved to the background.
    Background,
}

/// State shared with the status task.
#[derive(Debug)]
struct Shared {
    manager: ConnectionManager,
    config: Mutex<SessionConfig>,
    status_tx: watch::Sender<SessionStatus>,
    status_events: broadcast::Sender<SessionStatus>,
    /// Whether the current connection has been sent `authenticate`.
    authenticated: tokio::sync::Mutex<bool>,
}

/// Real-time session over one managed connection.
///
/// Must be created inside a tokio runtime: construction spawns the router
/// and status tasks. Call [`shutdown`](Self::shutdown) to stop them and
/// wait for them to finish. Dropping the service stops them too, and
/// disconnects in the background.
#[derive(Debug)]
pub struct SessionService {
    shared: Arc<Shared>,
    router: EventRouter,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionService {
    /// Create a disconnected session.
    pub fn new(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        let manager = ConnectionManager::new(connector, config.connection);
        let router = EventRouter::new(CATEGORY_CHANNEL_CAPACITY);
        let (status_tx, _) = watch::channel(SessionStatus::Disconnected);
        let (status_events, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let shared = Arc::new(Shared {
            manager,
            config: Mutex::new(config),
            status_tx,
            status_events,
            authenticated: tokio::sync::Mutex::new(false),
        });

        // Subscribe before spawning so no early frame or transition is missed.
        let inbound = shared.manager.subscribe_inbound();
        let transitions = shared.manager.subscribe_state();

        let router_task = {
            let router = router.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = router.run(inbound) => {}
                }
            })
        };
        let status_task = tokio::spawn(Arc::clone(&shared).track_status(transitions, cancel.clone()));

        Self {
            shared,
            router,
            cancel,
            tasks: Mutex::new(vec![router_task, status_task]),
        }
    }

    /// Replace endpoint and credential.
    ///
    /// A live or recovering connection is torn down and re-established
    /// against the new target. Otherwise the new values apply on the next
    /// [`connect`](Self::connect).
    pub async fn configure(&self, endpoint: &str, credential: Option<String>) -> Result<()> {
        {
            let mut config = self.shared.config();
            config.endpoint = endpoint.to_string();
            config.credential = credential;
        }
        log::info!("[Session] Configured endpoint {}", endpoint);

        let live = !matches!(self.shared.manager.state(), ConnectionState::Disconnected)
            || self.shared.manager.retry_pending();
        if !live {
            return Ok(());
        }
        self.disconnect().await;
        self.connect().await
    }

    /// Connect and authenticate.
    ///
    /// No-op when already connected.
    pub async fn connect(&self) -> Result<()> {
        if self.shared.manager.state().is_connected() {
            return Ok(());
        }

        let (url, credential) = {
            let config = self.shared.config();
            (config.ws_url(), config.credential.clone())
        };

        *self.shared.authenticated.lock().await = false;
        self.shared.manager.connect(&url, credential.as_deref()).await?;
        self.shared.authenticate_once().await
    }

    /// Disconnect. Idempotent.
    pub async fn disconnect(&self) {
        *self.shared.authenticated.lock().await = false;
        self.shared.manager.disconnect().await;
    }

    /// Send a typed command.
    pub async fn send(&self, command: &OutboundCommand) -> Result<()> {
        self.shared.send(command).await
    }

    /// Ask the backend for events of `topic`.
    pub async fn subscribe(&self, topic: Topic) -> Result<()> {
        log::debug!("[Session] Subscribing to {}", topic);
        self.send(&OutboundCommand::Subscribe { topic }).await
    }

    /// Stop receiving events of `topic`.
    pub async fn unsubscribe(&self, topic: Topic) -> Result<()> {
        log::debug!("[Session] Unsubscribing from {}", topic);
        self.send(&OutboundCommand::Unsubscribe { topic }).await
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.shared.status_tx.borrow().clone()
    }

    /// Watch the status (latest value only).
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Subscribe to every status change, in order.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatus> {
        self.shared.status_events.subscribe()
    }

    /// Events of one category, in receipt order.
    pub fn events(&self, category: EventCategory) -> broadcast::Receiver<TypedEvent> {
        self.router.subscribe(category)
    }

    /// React to the app changing visibility.
    ///
    /// Foreground connects unless a connection is live or a retry is
    /// already scheduled. Background disconnects only when
    /// `disconnect_on_background` is set.
    pub async fn handle_lifecycle(&self, lifecycle: AppLifecycle) -> Result<()> {
        match lifecycle {
            AppLifecycle::Foreground => {
                let state = self.shared.manager.state();
                if state.is_connected() || self.shared.manager.retry_pending() {
                    return Ok(());
                }
                log::info!("[Session] Foreground, connecting ({})", state);
                self.connect().await
            }
            AppLifecycle::Background => {
                if self.shared.config().disconnect_on_background {
                    log::info!("[Session] Background, disconnecting");
                    self.disconnect().await;
                }
                Ok(())
            }
        }
    }

    /// The underlying connection manager.
    pub fn connection(&self) -> &ConnectionManager {
        &self.shared.manager
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> SessionConfig {
        self.shared.config().clone()
    }

    /// Disconnect and stop background tasks.
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.cancel.cancel();
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            let _ = task.await;
        }
        log::debug!("[Session] Shut down");
    }
}

impl Drop for SessionService {
    fn drop(&mut self) {
        self.cancel.cancel();

        // The manager's loops outlive the handle; close them without blocking.
        let manager = &self.shared.manager;
        let idle = manager.state() == ConnectionState::Disconnected && !manager.retry_pending();
        if idle {
            return;
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let manager = manager.clone();
            runtime.spawn(async move { manager.disconnect().await });
        }
    }
}

impl Shared {
    fn config(&self) -> std::sync::MutexGuard<'_, SessionConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn send(&self, command: &OutboundCommand) -> Result<()> {
        if !self.manager.state().is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        let text = command
            .to_wire()
            .map_err(|e| ConnectionError::SendFailed(e.to_string()))?;
        self.manager.send_text(&text).await
    }

    /// Send `authenticate` once per connection, when a credential is set.
    async fn authenticate_once(&self) -> Result<()> {
        let Some(token) = self.config().credential.clone() else {
            return Ok(());
        };
        let mut authenticated = self.authenticated.lock().await;
        if *authenticated {
            return Ok(());
        }
        self.send(&OutboundCommand::Authenticate { token }).await?;
        *authenticated = true;
        log::debug!("[Session] Authenticated");
        Ok(())
    }

    /// Derive [`SessionStatus`] from connection transitions.
    async fn track_status(
        self: Arc<Self>,
        mut transitions: broadcast::Receiver<ConnectionState>,
        cancel: CancellationToken,
    ) {
        // Set between a lost connection and the next Connected or Disconnected.
        let mut recovering = false;
        let mut attempt = 0;
        loop {
            let state = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                next = transitions.recv() => match next {
                    Ok(state) => state,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("[Session] Missed {} state transition(s)", skipped);
                        self.manager.state()
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
            };

            let status = match state {
                ConnectionState::Disconnected | ConnectionState::Disconnecting => {
                    recovering = false;
                    attempt = 0;
                    SessionStatus::Disconnected
                }
                ConnectionState::Connecting if recovering => {
                    attempt += 1;
                    SessionStatus::Reconnecting { attempt }
                }
                ConnectionState::Connecting => SessionStatus::Connecting,
                ConnectionState::Connected => {
                    recovering = false;
                    attempt = 0;
                    // Callers may send as soon as they see Connected, so
                    // `authenticate` has to be on the wire first.
                    if let Err(e) = self.authenticate_once().await {
                        // The heartbeat surfaces a broken write half as a drop.
                        log::warn!("[Session] Authentication failed: {}", e);
                        continue;
                    }
                    SessionStatus::Connected
                }
                ConnectionState::Failed(err) => {
                    if matches!(err, ConnectionError::ConnectionLost(_))
                        || self.manager.retry_pending()
                    {
                        recovering = true;
                    }
                    *self.authenticated.lock().await = false;
                    SessionStatus::Failed(err.to_string())
                }
            };
            self.publish(status);
        }
    }

    fn publish(&self, status: SessionStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            log::info!("[Session] Status: {}", status);
            let _ = self.status_events.send(status.clone());
            *current = status;
            true
        });
    }
}

//! Realtime notification channel with automatic reconnection
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  RealtimeChannel                      │
//! │  - connect(token) / disconnect()                      │
//! │  - mark_read / mark_all_read (fire-and-forget)        │
//! │  - subscribe(listener)                                │
//! └──────────────────────────────────────────────────────┘
//!                           │ spawns one driver
//!                           ▼
//! ┌──────────────────────────────────────────────────────┐
//! │                     driver task                       │
//! │  connect ─► pump frames ─► closed ─► backoff ─► ...   │
//! └──────────────────────────────────────────────────────┘
//!            │                          │
//!            ▼                          ▼
//!     PushConnector          NotificationDeduplicator ─► SubscriberRegistry
//! ```
//!
//! # Reconnection Policy
//!
//! An unexpected close (or a failed connect) schedules another attempt after
//! `base_delay * 2^(k-1)` unless the attempt cap is reached or no token is
//! stored. Reaching the cap leaves the channel `Exhausted`, which the UI can
//! observe through [`RealtimeChannel::watch_state`] to offer a manual
//! reconnect. `disconnect()` sets the attempt counter to the cap and stops the
//! driver.
//!
//! Exactly one driver exists per channel, so reconnects are strictly
//! sequential and there is never more than one socket.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tracing::{debug, info, warn};

use super::backoff::BackoffPolicy;
use super::dedup::NotificationDeduplicator;
use super::envelope::{InboundEnvelope, OutboundEnvelope};
use super::socket::{PushConnection, PushConnector, WebSocketConnector};
use super::subscribers::{SubscriberRegistry, Subscription};
use crate::config::ChannelConfig;
use crate::models::{Notification, NotificationId};

/// Lifecycle of the push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected
    Idle,
    Connecting,
    Open,
    /// Closed deliberately, or waiting out a backoff delay
    Closed,
    /// Gave up after the attempt cap; only a manual `connect` restarts it
    Exhausted,
}

/// Attempt counter and the token reconnections reuse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconnectState {
    pub attempt: u32,
    pub token: Option<String>,
}

struct Shared {
    reconnect: ReconnectState,
    /// Outbound queue of the open socket; `None` unless Open.
    outbound: Option<mpsc::UnboundedSender<String>>,
    shutdown: Option<oneshot::Sender<()>>,
    /// Bumped on every spawn and disconnect; a driver from an older
    /// generation exits without touching state.
    generation: u64,
    driver_alive: bool,
    dedup: NotificationDeduplicator,
}

struct ChannelInner {
    config: ChannelConfig,
    backoff: BackoffPolicy,
    connector: Arc<dyn PushConnector>,
    state: watch::Sender<ConnectionState>,
    wake: Notify,
    shared: Mutex<Shared>,
    subscribers: SubscriberRegistry<Notification>,
}

enum Ended {
    Shutdown,
    Dropped,
}

/// A single push connection authenticated by a token in its URI.
#[derive(Clone)]
pub struct RealtimeChannel {
    inner: Arc<ChannelInner>,
}

impl RealtimeChannel {
    /// Channel over WebSockets.
    pub fn new(config: ChannelConfig) -> Self {
        Self::with_connector(config, Arc::new(WebSocketConnector))
    }

    pub fn with_connector(config: ChannelConfig, connector: Arc<dyn PushConnector>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Arc::new(ChannelInner {
                backoff: BackoffPolicy::from(&config),
                config,
                connector,
                state,
                wake: Notify::new(),
                shared: Mutex::new(Shared {
                    reconnect: ReconnectState::default(),
                    outbound: None,
                    shutdown: None,
                    generation: 0,
                    driver_alive: false,
                    dedup: NotificationDeduplicator::default(),
                }),
                subscribers: SubscriberRegistry::new(),
            }),
        }
    }

    /// Start the connection. No-op while Open or Connecting.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self, token: impl Into<String>) {
        let mut shared = self.inner.lock();
        let state = self.state();
        if matches!(state, ConnectionState::Open | ConnectionState::Connecting) {
            debug!(state = ?state, "Push channel already connected or connecting");
            return;
        }

        shared.reconnect.token = Some(token.into());

        if shared.driver_alive {
            // Waiting out a backoff delay; attempt now.
            self.inner.wake.notify_one();
            return;
        }

        shared.generation += 1;
        shared.driver_alive = true;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        shared.shutdown = Some(shutdown_tx);
        let generation = shared.generation;
        self.inner.state.send_replace(ConnectionState::Connecting);
        drop(shared);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.drive(generation, shutdown_rx).await;
        });
    }

    /// Close the socket and stop reconnecting.
    pub fn disconnect(&self) {
        let mut shared = self.inner.lock();
        shared.reconnect.attempt = self.inner.backoff.max_attempts;
        shared.outbound = None;
        shared.generation += 1;
        shared.driver_alive = false;
        if let Some(shutdown) = shared.shutdown.take() {
            let _ = shutdown.send(());
        }
        if self.state() != ConnectionState::Idle {
            self.inner.state.send_replace(ConnectionState::Closed);
        }
        info!("Push channel disconnected");
    }

    pub fn mark_read(&self, id: NotificationId) {
        self.send_action(OutboundEnvelope::MarkRead {
            notification_id: id,
        });
    }

    pub fn mark_all_read(&self) {
        self.send_action(OutboundEnvelope::MarkAllRead);
    }

    /// Register a listener for first-seen notifications.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.inner.subscribers.subscribe(listener)
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn reconnect_state(&self) -> ReconnectState {
        self.inner.lock().reconnect.clone()
    }

    fn send_action(&self, action: OutboundEnvelope) {
        let shared = self.inner.lock();
        match shared.outbound {
            Some(ref outbound) if self.state() == ConnectionState::Open => {
                if outbound.send(action.to_text()).is_err() {
                    debug!(action = ?action, "Push socket closing, action dropped");
                }
            }
            _ => debug!(action = ?action, "Push channel not open, action dropped"),
        }
    }
}

impl ChannelInner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock only if `generation` still owns the channel.
    fn lock_current(&self, generation: u64) -> Option<MutexGuard<'_, Shared>> {
        let shared = self.lock();
        (shared.generation == generation).then_some(shared)
    }

    fn finish(&self, shared: &mut Shared, state: ConnectionState) {
        shared.driver_alive = false;
        shared.shutdown = None;
        shared.outbound = None;
        self.state.send_replace(state);
    }

    async fn drive(self: Arc<Self>, generation: u64, mut shutdown: oneshot::Receiver<()>) {
        loop {
            let url = {
                let Some(mut shared) = self.lock_current(generation) else {
                    return;
                };
                let Some(token) = shared.reconnect.token.clone() else {
                    self.finish(&mut shared, ConnectionState::Closed);
                    return;
                };
                self.state.send_replace(ConnectionState::Connecting);
                self.config.url_for_token(&token)
            };

            let connected = tokio::select! {
                _ = &mut shutdown => return,
                connected = self.connector.connect(&url) => connected,
            };

            match connected {
                Ok(connection) => {
                    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                    {
                        let Some(mut shared) = self.lock_current(generation) else {
                            return;
                        };
                        shared.reconnect.attempt = 0;
                        shared.outbound = Some(outbound_tx);
                        self.state.send_replace(ConnectionState::Open);
                    }
                    info!("Push channel open");

                    let ended = self.pump(connection, outbound_rx, &mut shutdown).await;
                    if let Ended::Shutdown = ended {
                        return;
                    }
                    warn!("Push channel closed unexpectedly");
                }
                Err(e) => warn!(error = %e, "Push channel connect failed"),
            }

            let delay = {
                let Some(mut shared) = self.lock_current(generation) else {
                    return;
                };
                shared.outbound = None;

                if shared.reconnect.token.is_none() {
                    self.finish(&mut shared, ConnectionState::Closed);
                    return;
                }
                if !self.backoff.allows(shared.reconnect.attempt) {
                    warn!(
                        attempts = shared.reconnect.attempt,
                        "Push channel reconnection attempts exhausted"
                    );
                    self.finish(&mut shared, ConnectionState::Exhausted);
                    return;
                }

                shared.reconnect.attempt += 1;
                self.state.send_replace(ConnectionState::Closed);
                let attempt = shared.reconnect.attempt;
                let delay = self.backoff.delay(attempt).unwrap_or(self.backoff.base_delay);
                info!(
                    attempt = attempt,
                    max = self.backoff.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling push channel reconnection"
                );
                delay
            };

            tokio::select! {
                _ = &mut shutdown => return,
                _ = tokio::time::sleep(delay) => {}
                _ = self.wake.notified() => debug!("Reconnection requested early"),
            }
        }
    }

    async fn pump(
        &self,
        connection: PushConnection,
        mut outbound_rx: mpsc::UnboundedReceiver<String>,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> Ended {
        let PushConnection {
            mut outbound,
            mut inbound,
        } = connection;

        loop {
            // Inbound before outbound so actions never overtake frames
            // already received.
            tokio::select! {
                biased;
                _ = &mut *shutdown => {
                    let _ = outbound.close().await;
                    return Ended::Shutdown;
                }
                frame = inbound.next() => match frame {
                    Some(Ok(text)) => self.handle_frame(&text),
                    Some(Err(e)) => {
                        warn!(error = %e, "Push channel error");
                        return Ended::Dropped;
                    }
                    None => return Ended::Dropped,
                },
                Some(text) = outbound_rx.recv() => {
                    if let Err(e) = outbound.send(text).await {
                        warn!(error = %e, "Push channel send failed");
                        return Ended::Dropped;
                    }
                }
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        match serde_json::from_str::<InboundEnvelope>(text) {
            Ok(InboundEnvelope::Notification { notification }) => self.deliver(notification),
            Ok(InboundEnvelope::ReadConfirmation { notification_id }) => {
                debug!(notification_id = notification_id, "Notification marked as read");
            }
            Ok(InboundEnvelope::AllReadConfirmation) => {
                debug!("All notifications marked as read");
            }
            Ok(InboundEnvelope::Unknown) => debug!("Ignoring unknown push frame"),
            Err(e) => warn!(error = %e, "Unparseable push frame"),
        }
    }

    fn deliver(&self, notification: Notification) {
        let fresh = self.lock().dedup.admit(notification.id);
        if !fresh {
            debug!(notification_id = notification.id, "Duplicate notification ignored");
            return;
        }
        debug!(notification_id = notification.id, "Dispatching notification");
        self.subscribers.publish(&notification);
    }
}

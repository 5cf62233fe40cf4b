//! Managed connection: one physical socket shared by many listener bundles
//!
//! Each connection is driven by a single task that owns the transport event
//! receiver and every timer (connection timeout, reconnect backoff). The
//! record itself sits behind a mutex that is only held for synchronous
//! bookkeeping, never while a listener callback runs, so callbacks are free to
//! call back into the registry.
//!
//! ```text
//! Idle → Connecting → Open → {Closing | Reconnecting} → Connecting → … → Closed
//! ```

use super::backoff::reconnect_delay;
use super::listener::{ListenerBundle, ListenerId};
use super::transport::{CloseInfo, OutboundFrame, Transport, TransportEvent};
use chrono::{DateTime, Utc};
use livefeed_core::ReconnectConfig;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a managed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Reconnecting,
    /// Terminal; the connection is (or is about to be) out of the registry
    Closed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }
}

struct ConnectionInner {
    state: ConnectionState,
    /// Ordered by id, i.e. registration order
    listeners: BTreeMap<ListenerId, ListenerBundle>,
    reconnect_attempts: u32,
    should_reconnect: bool,
    last_activity: Option<DateTime<Utc>>,
    /// Outbound half of the current transport session
    socket: Option<UnboundedSender<OutboundFrame>>,
}

/// What the driver does after a session ends
#[derive(Debug)]
enum NextStep {
    Retry { attempt: u32, delay: Duration },
    Retire,
    GiveUp,
}

/// A socket shared by every listener bundle registered for one URL
pub struct ManagedConnection {
    url: String,
    config: ReconnectConfig,
    /// Fired on teardown; clears the driver's pending timers
    cancel: CancellationToken,
    inner: Mutex<ConnectionInner>,
}

impl ManagedConnection {
    pub(crate) fn new(url: String, config: ReconnectConfig) -> Self {
        Self {
            url,
            config,
            cancel: CancellationToken::new(),
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Idle,
                listeners: BTreeMap::new(),
                reconnect_attempts: 0,
                should_reconnect: true,
                last_activity: None,
                socket: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    pub fn is_connecting(&self) -> bool {
        self.state().is_connecting()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.lock().reconnect_attempts
    }

    pub fn should_reconnect(&self) -> bool {
        self.lock().should_reconnect
    }

    /// Last successful send or receive (diagnostics only)
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.lock().last_activity
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn has_listener(&self, id: ListenerId) -> bool {
        self.lock().listeners.contains_key(&id)
    }

    // ─── Registry-facing bookkeeping ────────────────────────────────

    /// Attach a bundle unless the connection is already terminal
    ///
    /// Returns `Some(is_open)` on success. Attaching and reading the state
    /// under one lock means a bundle sees exactly one `on_open` for the
    /// current session: either from the driver or from the registry.
    pub(crate) fn try_attach(&self, id: ListenerId, bundle: ListenerBundle) -> Option<bool> {
        let mut inner = self.lock();
        if !inner.should_reconnect || inner.state == ConnectionState::Closed {
            return None;
        }
        inner.listeners.insert(id, bundle);
        Some(inner.state.is_open())
    }

    /// Detach a bundle
    ///
    /// Returns `None` if the id was not attached, otherwise whether that left
    /// the connection empty. An empty connection is marked terminal
    /// immediately so the driver will not schedule another attempt.
    pub(crate) fn detach(&self, id: ListenerId) -> Option<bool> {
        let mut inner = self.lock();
        inner.listeners.remove(&id)?;
        if inner.listeners.is_empty() {
            inner.should_reconnect = false;
            return Some(true);
        }
        Some(false)
    }

    /// Tear down: cancel timers, close the socket cleanly, go terminal
    pub(crate) fn shutdown(&self) {
        self.cancel.cancel();
        let mut inner = self.lock();
        inner.should_reconnect = false;
        inner.state = ConnectionState::Closed;
        if let Some(socket) = inner.socket.take() {
            let _ = socket.send(OutboundFrame::Close(CloseInfo::normal("client disconnect")));
        }
        debug!("Connection to {} shut down", self.url);
    }

    /// Write a pre-serialized payload if the socket is open
    pub(crate) fn send_text(&self, text: String) -> bool {
        let mut inner = self.lock();
        if !inner.state.is_open() {
            return false;
        }
        let sent = inner
            .socket
            .as_ref()
            .map(|socket| socket.send(OutboundFrame::Text(text)).is_ok())
            .unwrap_or(false);
        if sent {
            inner.last_activity = Some(Utc::now());
        }
        sent
    }

    fn listeners_snapshot(&self) -> Vec<ListenerBundle> {
        self.lock().listeners.values().cloned().collect()
    }

    // ─── Driver ─────────────────────────────────────────────────────

    /// Spawn the task that drives this connection through its lifecycle
    ///
    /// `retire` is called when the connection leaves service on its own
    /// (clean close or retries exhausted) so the owner can drop it.
    pub(crate) fn spawn_driver<F>(self: &Arc<Self>, transport: Arc<dyn Transport>, retire: F)
    where
        F: Fn(&Arc<ManagedConnection>) + Send + 'static,
    {
        let conn = Arc::clone(self);
        tokio::spawn(async move { conn.drive(transport, retire).await });
    }

    async fn drive<F>(self: Arc<Self>, transport: Arc<dyn Transport>, retire: F)
    where
        F: Fn(&Arc<ManagedConnection>),
    {
        loop {
            let session = transport.open(&self.url);
            if !self.begin_connecting(session.outbound) {
                return;
            }

            let close = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Driver for {} cancelled", self.url);
                    return;
                }
                close = self.pump(session.events) => close,
            };

            match self.finish_session(close) {
                NextStep::Retry { attempt, delay } => {
                    info!(
                        "Reconnecting to {} in {:?} (attempt {}/{})",
                        self.url, delay, attempt, self.config.max_reconnect_attempts
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => {
                            debug!("Pending reconnect to {} cancelled", self.url);
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                NextStep::Retire => {
                    retire(&self);
                    return;
                }
                NextStep::GiveUp => {
                    error!(
                        "Giving up on {} after {} reconnect attempts",
                        self.url, self.config.max_reconnect_attempts
                    );
                    retire(&self);
                    for listener in self.listeners_snapshot() {
                        listener.emit_failed();
                    }
                    return;
                }
            }
        }
    }

    /// Enter `Connecting` with a fresh socket; false if torn down meanwhile
    fn begin_connecting(&self, socket: UnboundedSender<OutboundFrame>) -> bool {
        let mut inner = self.lock();
        if self.cancel.is_cancelled() || !inner.should_reconnect {
            return false;
        }
        inner.state = ConnectionState::Connecting;
        inner.socket = Some(socket);
        debug!("Connecting to {}", self.url);
        true
    }

    /// Process one session's events until it closes or times out
    async fn pump(&self, mut events: UnboundedReceiver<TransportEvent>) -> CloseInfo {
        let timeout = tokio::time::sleep(self.config.connection_timeout());
        tokio::pin!(timeout);
        let mut opened = false;

        loop {
            tokio::select! {
                _ = &mut timeout, if !opened => {
                    warn!(
                        "Connection to {} timed out after {:?}",
                        self.url,
                        self.config.connection_timeout()
                    );
                    let info = CloseInfo::timeout();
                    self.force_close(&info);
                    return info;
                }
                event = events.recv() => match event {
                    Some(TransportEvent::Opened) => {
                        opened = true;
                        self.handle_open();
                    }
                    Some(TransportEvent::Message(text)) => self.handle_message(&text),
                    Some(TransportEvent::Error(message)) => self.handle_error(&message),
                    Some(TransportEvent::Closed(info)) => return info,
                    None => return CloseInfo::abnormal("transport ended without close"),
                },
            }
        }
    }

    fn force_close(&self, info: &CloseInfo) {
        let mut inner = self.lock();
        inner.state = ConnectionState::Closing;
        if let Some(socket) = inner.socket.take() {
            let _ = socket.send(OutboundFrame::Close(info.clone()));
        }
    }

    fn handle_open(&self) {
        let listeners = {
            let mut inner = self.lock();
            inner.state = ConnectionState::Open;
            inner.reconnect_attempts = 0;
            inner.last_activity = Some(Utc::now());
            inner.listeners.values().cloned().collect::<Vec<_>>()
        };
        info!("Connected to {} ({} listeners)", self.url, listeners.len());
        for listener in &listeners {
            listener.emit_open();
        }
    }

    fn handle_message(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                warn!("Dropping malformed message from {}: {}", self.url, e);
                return;
            }
        };
        if !value.is_object() {
            warn!("Dropping non-object message from {}", self.url);
            return;
        }

        let listeners = {
            let mut inner = self.lock();
            inner.last_activity = Some(Utc::now());
            inner.listeners.values().cloned().collect::<Vec<_>>()
        };
        for listener in &listeners {
            listener.emit_message(&value);
        }
    }

    fn handle_error(&self, message: &str) {
        warn!("Transport error on {}: {}", self.url, message);
        for listener in self.listeners_snapshot() {
            listener.emit_error(message);
        }
    }

    /// Decide what follows a close, then tell every listener about it
    fn finish_session(&self, close: CloseInfo) -> NextStep {
        let (listeners, step) = {
            let mut inner = self.lock();
            inner.socket = None;

            let step = if inner.should_reconnect && !close.is_intentional() {
                inner.reconnect_attempts += 1;
                let attempt = inner.reconnect_attempts;
                if attempt > self.config.max_reconnect_attempts {
                    inner.should_reconnect = false;
                    inner.state = ConnectionState::Closed;
                    NextStep::GiveUp
                } else {
                    inner.state = ConnectionState::Reconnecting;
                    NextStep::Retry {
                        attempt,
                        delay: reconnect_delay(attempt, &self.config),
                    }
                }
            } else {
                inner.should_reconnect = false;
                inner.state = ConnectionState::Closed;
                NextStep::Retire
            };

            (inner.listeners.values().cloned().collect::<Vec<_>>(), step)
        };

        if close.is_intentional() {
            info!("Connection to {} closed: {}", self.url, close.reason);
        } else {
            warn!(
                "Connection to {} lost (code {}): {}",
                self.url, close.code, close.reason
            );
        }

        for listener in &listeners {
            listener.emit_close(&close);
        }
        step
    }
}

impl fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("ManagedConnection")
            .field("url", &self.url)
            .field("state", &inner.state)
            .field("listeners", &inner.listeners.len())
            .field("reconnect_attempts", &inner.reconnect_attempts)
            .field("should_reconnect", &inner.should_reconnect)
            .finish()
    }
}

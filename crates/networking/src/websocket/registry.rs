//! Connection registry: at most one managed connection per endpoint URL

use super::connection::ManagedConnection;
use super::listener::{ListenerBundle, ListenerId};
use super::transport::Transport;
use livefeed_core::ReconnectConfig;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, warn};

/// Where to connect and how to retry
///
/// The reconnect policy is fixed by whichever caller creates the connection;
/// later callers attaching to the same URL share it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectConfig {
    pub url: String,
    pub reconnect: ReconnectConfig,
}

impl ConnectConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }
}

/// Proof of attachment returned by [`ConnectionRegistry::connect`]
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    id: ListenerId,
    connection: Arc<ManagedConnection>,
}

impl ListenerHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn url(&self) -> &str {
        self.connection.url()
    }

    pub fn connection(&self) -> &Arc<ManagedConnection> {
        &self.connection
    }
}

struct RegistryInner {
    transport: Arc<dyn Transport>,
    connections: Mutex<HashMap<String, Arc<ManagedConnection>>>,
    next_listener: AtomicU64,
}

impl RegistryInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<ManagedConnection>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop `conn` unless a newer connection already took its URL
    fn retire(&self, conn: &Arc<ManagedConnection>) {
        let mut connections = self.lock();
        let same = connections
            .get(conn.url())
            .map(|current| Arc::ptr_eq(current, conn))
            .unwrap_or(false);
        if same {
            connections.remove(conn.url());
            debug!("Retired connection to {}", conn.url());
        }
    }
}

/// Shared registry of managed connections
///
/// Cloning is cheap; clones see the same connections.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                transport,
                connections: Mutex::new(HashMap::new()),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    /// Attach `bundle` to the connection for `config.url`, creating it if needed
    ///
    /// If the shared connection is already open, `on_open` runs before this
    /// returns. Must be called from within a tokio runtime.
    pub fn connect(&self, config: ConnectConfig, bundle: ListenerBundle) -> ListenerHandle {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));

        let (connection, open_now) = {
            let mut connections = self.inner.lock();

            let existing = connections.get(&config.url).and_then(|conn| {
                conn.try_attach(id, bundle.clone())
                    .map(|open| (Arc::clone(conn), open))
            });

            match existing {
                Some(attached) => {
                    debug!("Reusing connection to {} for listener {:?}", config.url, id);
                    attached
                }
                None => {
                    info!("Opening connection to {}", config.url);
                    let conn = Arc::new(ManagedConnection::new(
                        config.url.clone(),
                        config.reconnect.clone(),
                    ));
                    // A fresh connection is never terminal
                    let _ = conn.try_attach(id, bundle.clone());
                    connections.insert(config.url.clone(), Arc::clone(&conn));

                    let registry: Weak<RegistryInner> = Arc::downgrade(&self.inner);
                    conn.spawn_driver(Arc::clone(&self.inner.transport), move |retired| {
                        if let Some(registry) = registry.upgrade() {
                            registry.retire(retired);
                        }
                    });
                    (conn, false)
                }
            }
        };

        if open_now {
            bundle.emit_open();
        }

        ListenerHandle { id, connection }
    }

    /// Detach one bundle; the last one out tears the connection down
    ///
    /// Unknown URLs and ids are ignored. Returns whether anything was detached.
    pub fn disconnect(&self, url: &str, id: ListenerId) -> bool {
        let mut connections = self.inner.lock();
        let Some(conn) = connections.get(url).cloned() else {
            return false;
        };

        match conn.detach(id) {
            None => false,
            Some(false) => {
                debug!("Listener {:?} left {} ({} remain)", id, url, conn.listener_count());
                true
            }
            Some(true) => {
                conn.shutdown();
                connections.remove(url);
                info!("Closed connection to {} (no listeners left)", url);
                true
            }
        }
    }

    /// Serialize `payload` and write it if the connection is open
    pub fn send<T: Serialize + ?Sized>(&self, url: &str, payload: &T) -> bool {
        let Some(conn) = self.get(url) else {
            return false;
        };
        match serde_json::to_string(payload) {
            Ok(text) => conn.send_text(text),
            Err(e) => {
                warn!("Could not serialize payload for {}: {}", url, e);
                false
            }
        }
    }

    pub fn is_connected(&self, url: &str) -> bool {
        self.get(url).map(|conn| conn.is_open()).unwrap_or(false)
    }

    pub fn get(&self, url: &str) -> Option<Arc<ManagedConnection>> {
        self.inner.lock().get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.inner.lock().keys().cloned().collect();
        urls.sort();
        urls
    }

    /// Tear down every connection
    pub fn close_all(&self) {
        let drained: Vec<Arc<ManagedConnection>> =
            self.inner.lock().drain().map(|(_, conn)| conn).collect();
        if !drained.is_empty() {
            info!("Closing {} connections", drained.len());
        }
        for conn in drained {
            conn.shutdown();
        }
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("urls", &self.urls())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::mock::MockTransport;
    use crate::websocket::transport::{CloseInfo, OutboundFrame};
    use crate::websocket::ConnectionState;
    use serde_json::{json, Value};
    use std::time::Duration;

    const URL: &str = "ws://localhost:8000/ws/dashboard/";

    /// Let spawned driver tasks catch up
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn registry(transport: &MockTransport) -> ConnectionRegistry {
        ConnectionRegistry::new(Arc::new(transport.clone()))
    }

    fn recorder() -> (ListenerBundle, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c, d, e) = (log.clone(), log.clone(), log.clone(), log.clone(), log.clone());
        let bundle = ListenerBundle::new()
            .on_open(move || a.lock().unwrap().push("open".into()))
            .on_message(move |v: &Value| b.lock().unwrap().push(format!("msg:{}", v["n"])))
            .on_error(move |m: &str| c.lock().unwrap().push(format!("error:{}", m)))
            .on_close(move |i: &CloseInfo| d.lock().unwrap().push(format!("close:{}", i.code)))
            .on_failed(move || e.lock().unwrap().push("failed".into()));
        (bundle, log)
    }

    fn events(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_url_shares_one_connection() {
        let transport = MockTransport::new();
        let registry = registry(&transport);
        let (first, first_log) = recorder();
        let (second, second_log) = recorder();

        let h1 = registry.connect(ConnectConfig::new(URL), first);
        let h2 = registry.connect(ConnectConfig::new(URL), second);
        settle().await;

        assert_eq!(transport.open_count(), 1);
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(h1.connection(), h2.connection()));
        assert_ne!(h1.id(), h2.id());

        let session = transport.session(0).unwrap();
        session.open();
        session.message(r#"{"n": 1}"#);
        settle().await;

        assert_eq!(events(&first_log), vec!["open", "msg:1"]);
        assert_eq!(events(&second_log), vec!["open", "msg:1"]);
        assert!(registry.is_connected(URL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_listener_gets_open_synchronously() {
        let transport = MockTransport::new();
        let registry = registry(&transport);
        let (first, _) = recorder();
        registry.connect(ConnectConfig::new(URL), first);
        settle().await;
        transport.session(0).unwrap().open();
        settle().await;

        let (late, late_log) = recorder();
        registry.connect(ConnectConfig::new(URL), late);
        assert_eq!(events(&late_log), vec!["open"]);
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_messages_are_dropped() {
        let transport = MockTransport::new();
        let registry = registry(&transport);
        let (bundle, log) = recorder();
        registry.connect(ConnectConfig::new(URL), bundle);
        settle().await;

        let session = transport.session(0).unwrap();
        session.open();
        session.message("not json");
        session.message("[1, 2]");
        session.message(r#"{"n": 2}"#);
        settle().await;

        assert_eq!(events(&log), vec!["open", "msg:2"]);
        assert_eq!(registry.get(URL).unwrap().state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_does_not_close() {
        let transport = MockTransport::new();
        let registry = registry(&transport);
        let (bundle, log) = recorder();
        registry.connect(ConnectConfig::new(URL), bundle);
        settle().await;

        let session = transport.session(0).unwrap();
        session.open();
        session.error("hiccup");
        settle().await;

        assert_eq!(events(&log), vec!["open", "error:hiccup"]);
        assert!(registry.is_connected(URL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_close_retires_without_reconnect() {
        let transport = MockTransport::new();
        let registry = registry(&transport);
        let (bundle, log) = recorder();
        registry.connect(ConnectConfig::new(URL), bundle);
        settle().await;

        let session = transport.session(0).unwrap();
        session.open();
        session.close(CloseInfo::normal("server done"));
        settle().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(events(&log), vec!["open", "close:1000"]);
        assert_eq!(transport.open_count(), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abnormal_close_reconnects_and_resets_attempts() {
        let transport = MockTransport::new();
        let registry = registry(&transport);
        let (bundle, log) = recorder();
        let handle = registry.connect(ConnectConfig::new(URL), bundle);
        settle().await;

        transport.session(0).unwrap().open();
        settle().await;
        transport.session(0).unwrap().close(CloseInfo::abnormal("reset"));
        settle().await;

        let conn = handle.connection();
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
        assert_eq!(conn.reconnect_attempts(), 1);

        // First retry waits 1s ±25%
        tokio::time::sleep(Duration::from_millis(1_300)).await;
        assert_eq!(transport.open_count(), 2);

        transport.session(1).unwrap().open();
        settle().await;
        assert_eq!(conn.reconnect_attempts(), 0);
        assert_eq!(events(&log), vec!["open", "close:1006", "open"]);
        assert!(Arc::ptr_eq(&registry.get(URL).unwrap(), conn));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout_forces_close_and_retry() {
        let transport = MockTransport::new();
        let registry = registry(&transport);
        let (bundle, log) = recorder();
        registry.connect(ConnectConfig::new(URL), bundle);
        settle().await;

        // Never opened
        tokio::time::sleep(Duration::from_millis(10_001)).await;

        assert_eq!(events(&log), vec!["close:4008"]);
        let sent = transport.session(0).unwrap().sent();
        assert!(matches!(
            sent.as_slice(),
            [OutboundFrame::Close(info)] if info.code == 4008
        ));
        assert_eq!(registry.get(URL).unwrap().reconnect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let transport = MockTransport::always_failing();
        let registry = registry(&transport);
        let (bundle, log) = recorder();
        let handle = registry.connect(ConnectConfig::new(URL), bundle);

        // 1 + 2 + 4 + 8 + 16 seconds of backoff, jitter included
        tokio::time::sleep(Duration::from_secs(60)).await;

        // The initial attempt plus five retries
        assert_eq!(transport.open_count(), 6);
        assert!(registry.is_empty());
        assert!(!handle.connection().should_reconnect());
        assert_eq!(handle.connection().state(), ConnectionState::Closed);

        let log = events(&log);
        assert_eq!(log.iter().filter(|e| *e == "failed").count(), 1);
        assert_eq!(log.last().map(String::as_str), Some("failed"));
        assert_eq!(log.iter().filter(|e| *e == "close:1006").count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connection_is_replaced_on_next_connect() {
        let transport = MockTransport::always_failing();
        let registry = registry(&transport);
        let (bundle, _) = recorder();
        let first = registry.connect(ConnectConfig::new(URL), bundle);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(registry.is_empty());

        transport.stop_failing();
        let (bundle, _) = recorder();
        let second = registry.connect(ConnectConfig::new(URL), bundle);
        assert!(!Arc::ptr_eq(first.connection(), second.connection()));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_disconnect_closes_and_cancels_retry() {
        let transport = MockTransport::new();
        let registry = registry(&transport);
        let (a, _) = recorder();
        let (b, _) = recorder();
        let ha = registry.connect(ConnectConfig::new(URL), a);
        let hb = registry.connect(ConnectConfig::new(URL), b);
        settle().await;

        let session = transport.session(0).unwrap();
        session.open();
        settle().await;

        assert!(registry.disconnect(URL, ha.id()));
        assert_eq!(registry.len(), 1);
        assert!(!registry.disconnect(URL, ha.id()));

        session.close(CloseInfo::abnormal("reset"));
        settle().await;
        assert_eq!(hb.connection().state(), ConnectionState::Reconnecting);

        assert!(registry.disconnect(URL, hb.id()));
        assert!(registry.is_empty());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_sends_clean_close() {
        let transport = MockTransport::new();
        let registry = registry(&transport);
        let (bundle, _) = recorder();
        let handle = registry.connect(ConnectConfig::new(URL), bundle);
        settle().await;
        let session = transport.session(0).unwrap();
        session.open();
        settle().await;

        registry.disconnect(URL, handle.id());

        let sent = session.sent();
        assert!(matches!(
            sent.as_slice(),
            [OutboundFrame::Close(info)] if info.is_intentional()
        ));
        assert!(!registry.disconnect("ws://unknown/", handle.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_only_when_open() {
        let transport = MockTransport::new();
        let registry = registry(&transport);
        let (bundle, _) = recorder();
        let handle = registry.connect(ConnectConfig::new(URL), bundle);
        settle().await;

        assert!(!registry.send(URL, &json!({"action": "subscribe"})));
        assert!(!registry.send("ws://elsewhere/", &json!({})));

        let session = transport.session(0).unwrap();
        session.open();
        settle().await;

        assert!(registry.send(URL, &json!({"action": "subscribe"})));
        assert_eq!(
            session.sent(),
            vec![OutboundFrame::Text(r#"{"action":"subscribe"}"#.to_string())]
        );
        assert!(handle.connection().last_activity().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_listener_does_not_block_others() {
        let transport = MockTransport::new();
        let registry = registry(&transport);
        let panicky = ListenerBundle::new().on_message(|_| panic!("listener bug"));
        let (healthy, log) = recorder();
        registry.connect(ConnectConfig::new(URL), panicky);
        registry.connect(ConnectConfig::new(URL), healthy);
        settle().await;

        let session = transport.session(0).unwrap();
        session.open();
        session.message(r#"{"n": 1}"#);
        session.message(r#"{"n": 2}"#);
        settle().await;

        assert_eq!(events(&log), vec!["open", "msg:1", "msg:2"]);
        assert!(registry.is_connected(URL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_all_empties_registry() {
        let transport = MockTransport::new();
        let registry = registry(&transport);
        registry.connect(ConnectConfig::new(URL), ListenerBundle::new());
        registry.connect(ConnectConfig::new("ws://other:1/ws/"), ListenerBundle::new());
        settle().await;
        assert_eq!(registry.urls(), vec![URL.to_string(), "ws://other:1/ws/".to_string()]);

        registry.close_all();
        assert!(registry.is_empty());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.open_count(), 2);
    }
}

//! LiveFeed - live socket with HTTP polling fallback
//!
//! While the shared connection is healthy every inbound message is routed to
//! the topic subscribers. Once the socket layer gives up (`on_failed`), the
//! feed switches to polling the dashboard API: one fetch cycle immediately,
//! then one every `poll_interval`, until the connection opens again.

use crate::source::FeedSource;
use crate::status::FeedStatus;
use crate::subscribers::{
    MessageCallback, QueueCallback, SubscriberRegistry, Subscription, TransactionCallback,
};
use chrono::{DateTime, Utc};
use livefeed_core::{FallbackConfig, FeedMessage, Page, ProcessingCounts, Result};
use livefeed_networking::websocket::{
    CloseInfo, ConnectConfig, ConnectionRegistry, ListenerBundle, ListenerHandle,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ─── State ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct FeedState {
    handle: Option<ListenerHandle>,
    is_using_fallback: bool,
    /// Present exactly while the poll loop runs
    poll: Option<CancellationToken>,
    counts: ProcessingCounts,
    error: Option<String>,
    last_refreshed_at: Option<DateTime<Utc>>,
    shut_down: bool,
}

/// Clears the in-flight flag when a fetch cycle ends, however it ends
struct FetchGuard<'a>(&'a AtomicBool);

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct FeedShared {
    registry: ConnectionRegistry,
    connect: ConnectConfig,
    source: Arc<dyn FeedSource>,
    fallback: FallbackConfig,
    subscribers: SubscriberRegistry,
    state: Mutex<FeedState>,
    fetching: AtomicBool,
    status_tx: watch::Sender<FeedStatus>,
}

impl FeedShared {
    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register this feed's listener bundle with the registry
    fn attach(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let bundle = ListenerBundle::new()
            .on_open(with_feed(&weak, |feed| feed.on_connect()))
            .on_failed(with_feed(&weak, |feed| feed.on_connection_failed()));
        let bundle = {
            let weak = weak.clone();
            bundle.on_message(move |value: &Value| {
                if let Some(feed) = weak.upgrade() {
                    feed.on_message(value);
                }
            })
        };
        let bundle = {
            let weak = weak.clone();
            bundle.on_error(move |message: &str| {
                if let Some(feed) = weak.upgrade() {
                    feed.on_error(message);
                }
            })
        };
        let bundle = bundle.on_close(move |info: &CloseInfo| {
            if let Some(feed) = weak.upgrade() {
                feed.on_close(info);
            }
        });

        let handle = self.registry.connect(self.connect.clone(), bundle);
        debug!("Feed attached to {} as {:?}", handle.url(), handle.id());
        self.lock().handle = Some(handle);
        self.publish_status();
    }

    // ─── Connection signals ─────────────────────────────────────────

    fn on_connect(&self) {
        let poll = {
            let mut state = self.lock();
            state.is_using_fallback = false;
            state.error = None;
            state.poll.take()
        };
        if let Some(poll) = poll {
            poll.cancel();
            info!("Live connection to {} restored, polling stopped", self.connect.url);
        }
        self.publish_status();
    }

    fn on_connection_failed(self: &Arc<Self>) {
        let token = {
            let mut state = self.lock();
            if state.shut_down {
                return;
            }
            if state.poll.is_some() {
                debug!("Already polling {}; ignoring repeated failure", self.connect.url);
                return;
            }
            state.is_using_fallback = true;
            state.error = Some("Live updates unavailable; polling for changes".to_string());
            let token = CancellationToken::new();
            state.poll = Some(token.clone());
            token
        };

        warn!(
            "Live connection to {} failed, polling every {:?}",
            self.connect.url,
            self.fallback.poll_interval()
        );
        self.publish_status();
        tokio::spawn(poll_loop(
            Arc::downgrade(self),
            token,
            self.fallback.poll_interval(),
        ));
    }

    fn on_message(&self, value: &Value) {
        self.subscribers.publish_message(value, false);

        match FeedMessage::from_value(value) {
            Some(FeedMessage::QueueUpdate(item)) => {
                self.subscribers
                    .publish_queue(std::slice::from_ref(&item), false);
            }
            Some(FeedMessage::TransactionUpdate(transaction)) => {
                self.subscribers
                    .publish_transactions(std::slice::from_ref(&transaction), false);
            }
            Some(FeedMessage::ProcessingCounts(counts)) => {
                self.lock().counts = counts;
                self.publish_status();
            }
            None => {}
        }
    }

    fn on_error(&self, message: &str) {
        self.lock().error = Some(message.to_string());
        self.publish_status();
    }

    fn on_close(&self, info: &CloseInfo) {
        if !info.is_intentional() {
            self.lock().error = Some(format!("Connection lost ({})", info.code));
        }
        self.publish_status();
    }

    // ─── Fetch cycle ────────────────────────────────────────────────

    async fn refresh_data(&self) -> bool {
        if self
            .fetching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Fetch cycle already in flight; skipping");
            return false;
        }
        let _guard = FetchGuard(&self.fetching);

        let page_size = self.fallback.page_size;
        let (purchases, cashouts, activities) = tokio::join!(
            self.source.pending_purchases(page_size),
            self.source.pending_cashouts(page_size),
            self.source.pending_activities(page_size),
        );
        let purchases = page_or_empty("pending purchases", purchases);
        let cashouts = page_or_empty("pending cashouts", cashouts);
        let activities = page_or_empty("pending activities", activities);

        let counts = ProcessingCounts {
            pending_purchases: purchases.count,
            pending_cashouts: cashouts.count,
            pending_game_activities: activities.count,
        };
        {
            let mut state = self.lock();
            state.counts = counts;
            state.last_refreshed_at = Some(Utc::now());
        }

        let mut transactions = purchases.results;
        transactions.extend(cashouts.results);
        self.subscribers.publish_transactions(&transactions, true);
        self.subscribers.publish_queue(&activities.results, true);

        debug!(
            "Fetch cycle done: {} transactions, {} queue items",
            transactions.len(),
            activities.results.len()
        );
        self.publish_status();
        true
    }

    // ─── Status ─────────────────────────────────────────────────────

    fn status(&self) -> FeedStatus {
        let connection = self.registry.get(&self.connect.url);
        let state = self.lock();
        FeedStatus {
            is_connected: connection.as_ref().map(|c| c.is_open()).unwrap_or(false),
            is_connecting: connection
                .as_ref()
                .map(|c| c.is_connecting())
                .unwrap_or(false),
            error: state.error.clone(),
            reconnect_attempts: connection
                .as_ref()
                .map(|c| c.reconnect_attempts())
                .unwrap_or(0),
            counts: state.counts,
            is_using_fallback: state.is_using_fallback,
            last_refreshed_at: state.last_refreshed_at,
        }
    }

    fn publish_status(&self) {
        let next = self.status();
        self.status_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn shutdown(&self) {
        let (handle, poll) = {
            let mut state = self.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state.is_using_fallback = false;
            (state.handle.take(), state.poll.take())
        };
        if let Some(poll) = poll {
            poll.cancel();
        }
        if let Some(handle) = handle {
            self.registry.disconnect(handle.url(), handle.id());
        }
        info!("Feed for {} shut down", self.connect.url);
        self.publish_status();
    }
}

fn with_feed<F>(weak: &Weak<FeedShared>, f: F) -> impl Fn() + Send + Sync + 'static
where
    F: Fn(&Arc<FeedShared>) + Send + Sync + 'static,
{
    let weak = weak.clone();
    move || {
        if let Some(feed) = weak.upgrade() {
            f(&feed);
        }
    }
}

fn page_or_empty<T>(what: &str, result: Result<Page<T>>) -> Page<T> {
    match result {
        Ok(page) => page,
        Err(e) => {
            warn!("Failed to fetch {}: {}", what, e);
            Page::empty()
        }
    }
}

/// Lower bound for the poll period; `interval` rejects zero
const MIN_POLL_PERIOD: Duration = Duration::from_millis(1);

async fn poll_loop(feed: Weak<FeedShared>, cancel: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval(period.max(MIN_POLL_PERIOD));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // First tick completes immediately
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(feed) = feed.upgrade() else {
            break;
        };
        feed.refresh_data().await;
    }
    debug!("Fallback polling stopped");
}

// ─── Public handle ───────────────────────────────────────────────────

/// Live feed for one dashboard endpoint
///
/// Dropping the feed detaches it from the connection and stops polling.
pub struct LiveFeed {
    shared: Arc<FeedShared>,
}

impl LiveFeed {
    /// Attach to the shared connection for `connect.url`
    ///
    /// Fails with `ConfigError` if `fallback` has a zero poll interval or page
    /// size. Must be called from within a tokio runtime.
    pub fn start(
        registry: ConnectionRegistry,
        connect: ConnectConfig,
        source: Arc<dyn FeedSource>,
        fallback: FallbackConfig,
    ) -> Result<Self> {
        fallback.validate()?;

        let (status_tx, _) = watch::channel(FeedStatus::default());
        let shared = Arc::new(FeedShared {
            registry,
            connect,
            source,
            fallback,
            subscribers: SubscriberRegistry::new(),
            state: Mutex::new(FeedState::default()),
            fetching: AtomicBool::new(false),
            status_tx,
        });
        info!("Starting live feed for {}", shared.connect.url);
        shared.attach();
        Ok(Self { shared })
    }

    pub fn url(&self) -> &str {
        &self.shared.connect.url
    }

    pub fn status(&self) -> FeedStatus {
        self.shared.status()
    }

    /// Receiver that observes every status change
    pub fn watch_status(&self) -> watch::Receiver<FeedStatus> {
        self.shared.publish_status();
        self.shared.status_tx.subscribe()
    }

    pub fn is_using_fallback(&self) -> bool {
        self.shared.lock().is_using_fallback
    }

    pub fn counts(&self) -> ProcessingCounts {
        self.shared.lock().counts
    }

    /// Run one fetch cycle now; false if one was already in flight
    pub async fn refresh_data(&self) -> bool {
        self.shared.refresh_data().await
    }

    /// Re-attach after the connection was given up or closed cleanly
    ///
    /// Polling keeps running until the new connection opens.
    pub fn reconnect(&self) {
        let old = {
            let mut state = self.shared.lock();
            if state.shut_down {
                return;
            }
            state.handle.take()
        };
        if let Some(old) = old {
            self.shared.registry.disconnect(old.url(), old.id());
        }
        info!("Reconnecting live feed for {}", self.url());
        self.shared.attach();
    }

    /// Write a JSON payload over the live connection
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        self.shared.registry.send(self.url(), payload)
    }

    pub fn subscribe_to_queue_updates(&self, callback: QueueCallback) -> Subscription {
        self.shared.subscribers.subscribe_to_queue_updates(callback)
    }

    pub fn subscribe_to_transaction_updates(&self, callback: TransactionCallback) -> Subscription {
        self.shared.subscribers.subscribe_to_transaction_updates(callback)
    }

    pub fn subscribe_to_messages(&self, callback: MessageCallback) -> Subscription {
        self.shared.subscribers.subscribe_to_messages(callback)
    }

    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.shared.subscribers.unsubscribe(subscription)
    }

    /// Stop polling and detach from the connection
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use livefeed_core::{Error, QueueItem, ReconnectConfig, Transaction};
    use livefeed_networking::websocket::mock::MockTransport;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    const URL: &str = "ws://localhost:8000/ws/dashboard/";

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn transaction(id: &str, kind: &str) -> Transaction {
        serde_json::from_value(json!({ "id": id, "type": kind, "status": "pending", "amount": 10 }))
            .unwrap()
    }

    fn queue_item(id: &str) -> QueueItem {
        serde_json::from_value(json!({ "id": id, "operation": "recharge", "status": "pending" }))
            .unwrap()
    }

    #[derive(Default)]
    struct StubSource {
        cycles: AtomicUsize,
        fail_cashouts: AtomicBool,
        gate: Option<Arc<Notify>>,
    }

    impl StubSource {
        fn gated() -> (Self, Arc<Notify>) {
            let gate = Arc::new(Notify::new());
            (
                Self {
                    gate: Some(gate.clone()),
                    ..Default::default()
                },
                gate,
            )
        }

        fn cycles(&self) -> usize {
            self.cycles.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FeedSource for StubSource {
        async fn pending_purchases(&self, _page_size: u32) -> Result<Page<Transaction>> {
            self.cycles.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(Page {
                results: vec![transaction("p1", "purchase")],
                count: 3,
            })
        }

        async fn pending_cashouts(&self, _page_size: u32) -> Result<Page<Transaction>> {
            if self.fail_cashouts.load(Ordering::SeqCst) {
                return Err(Error::ApiError("HTTP 502".to_string()));
            }
            Ok(Page {
                results: vec![transaction("c1", "cashout")],
                count: 1,
            })
        }

        async fn pending_activities(&self, _page_size: u32) -> Result<Page<QueueItem>> {
            Ok(Page {
                results: vec![queue_item("q1"), queue_item("q2")],
                count: 2,
            })
        }
    }

    /// Gives up after a single failed retry, ~100ms in
    fn quick_failure() -> ConnectConfig {
        ConnectConfig::new(URL).with_reconnect(ReconnectConfig {
            max_reconnect_attempts: 1,
            base_delay_ms: 100,
            max_delay_ms: 100,
            connection_timeout_ms: 1_000,
        })
    }

    fn start(transport: &MockTransport, connect: ConnectConfig, source: Arc<StubSource>) -> LiveFeed {
        let registry = ConnectionRegistry::new(Arc::new(transport.clone()));
        LiveFeed::start(registry, connect, source, FallbackConfig::default()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_messages_are_routed_by_type() {
        let transport = MockTransport::new();
        let feed = start(&transport, ConnectConfig::new(URL), Arc::new(StubSource::default()));

        let raw = Arc::new(AtomicUsize::new(0));
        let raw_sink = raw.clone();
        feed.subscribe_to_messages(Arc::new(move |_: &Value, initial: bool| {
            assert!(!initial);
            raw_sink.fetch_add(1, Ordering::SeqCst);
        }));
        let queue = Arc::new(Mutex::new(Vec::new()));
        let queue_sink = queue.clone();
        feed.subscribe_to_queue_updates(Arc::new(move |items: &[QueueItem], initial: bool| {
            queue_sink.lock().unwrap().push((items.len(), initial));
        }));
        let txs = Arc::new(Mutex::new(Vec::new()));
        let tx_sink = txs.clone();
        feed.subscribe_to_transaction_updates(Arc::new(move |items: &[Transaction], _: bool| {
            tx_sink.lock().unwrap().extend(items.iter().map(|t| t.id.clone()));
        }));

        settle().await;
        let session = transport.session(0).unwrap();
        session.open();
        session.message(r#"{"type": "queue_update", "data": {"id": 5, "operation": "redeem", "status": "pending"}}"#);
        session.message(r#"{"type": "transaction_update", "data": {"id": 9, "type": "cashout", "status": "pending", "amount": "12.5"}}"#);
        session.message(r#"{"type": "processing_counts", "data": {"pending_purchases": 4, "pending_cashouts": 1, "pending_game_activities": 7}}"#);
        session.message(r#"{"type": "chat_message", "data": {"text": "hi"}}"#);
        settle().await;

        assert_eq!(raw.load(Ordering::SeqCst), 4);
        assert_eq!(*queue.lock().unwrap(), vec![(1, false)]);
        assert_eq!(*txs.lock().unwrap(), vec!["9".to_string()]);
        assert_eq!(feed.counts().total(), 12);

        let status = feed.status();
        assert!(status.is_connected);
        assert!(!status.is_using_fallback);
        assert_eq!(status.counts.pending_game_activities, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_switches_to_polling() {
        let transport = MockTransport::always_failing();
        let source = Arc::new(StubSource::default());
        let feed = start(&transport, quick_failure(), source.clone());

        let loads = Arc::new(Mutex::new(Vec::new()));
        let sink = loads.clone();
        feed.subscribe_to_transaction_updates(Arc::new(move |items: &[Transaction], initial: bool| {
            let ids: Vec<String> = items.iter().map(|t| t.id.clone()).collect();
            sink.lock().unwrap().push((ids, initial));
        }));

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(transport.open_count(), 2);
        assert!(feed.is_using_fallback());
        assert_eq!(source.cycles(), 1);
        assert_eq!(
            *loads.lock().unwrap(),
            vec![(vec!["p1".to_string(), "c1".to_string()], true)]
        );

        let status = feed.status();
        assert!(status.is_using_fallback);
        assert!(!status.is_connected);
        assert!(status.last_refreshed_at.is_some());
        assert_eq!(status.counts.pending_purchases, 3);
        assert_eq!(status.counts.pending_game_activities, 2);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.cycles(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failure_keeps_one_poll_loop() {
        let transport = MockTransport::always_failing();
        let source = Arc::new(StubSource::default());
        let feed = start(&transport, quick_failure(), source.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.cycles(), 1);

        feed.shared.on_connection_failed();
        feed.shared.on_connection_failed();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.cycles(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_cancels_polling() {
        let transport = MockTransport::always_failing();
        let source = Arc::new(StubSource::default());
        let feed = start(&transport, quick_failure(), source.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(feed.is_using_fallback());

        transport.stop_failing();
        feed.reconnect();
        settle().await;
        // Still polling until the new socket actually opens
        assert!(feed.is_using_fallback());

        transport.last_session().unwrap().open();
        settle().await;
        assert!(!feed.is_using_fallback());
        assert!(feed.status().is_connected);
        assert!(feed.status().error.is_none());

        let cycles = source.cycles();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(source.cycles(), cycles);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_refresh_runs_once() {
        let transport = MockTransport::new();
        let (source, gate) = StubSource::gated();
        let source = Arc::new(source);
        let feed = start(&transport, ConnectConfig::new(URL), source.clone());

        let (first, second) = tokio::join!(feed.refresh_data(), async {
            settle().await;
            let second = feed.refresh_data().await;
            gate.notify_one();
            second
        });

        assert!(first);
        assert!(!second);
        assert_eq!(source.cycles(), 1);

        // Guard released after completion
        gate.notify_one();
        assert!(feed.refresh_data().await);
        assert_eq!(source.cycles(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_refresh_skipped_while_poll_in_flight() {
        let transport = MockTransport::always_failing();
        let (source, gate) = StubSource::gated();
        let source = Arc::new(source);
        let feed = start(&transport, quick_failure(), source.clone());

        // Poll cycle started on failure and is parked on the gate
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(feed.is_using_fallback());
        assert_eq!(source.cycles(), 1);

        assert!(!feed.refresh_data().await);
        assert_eq!(source.cycles(), 1);
        assert!(feed.status().last_refreshed_at.is_none());

        gate.notify_one();
        settle().await;
        assert!(feed.status().last_refreshed_at.is_some());

        // Next tick runs normally once the guard is released
        gate.notify_one();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.cycles(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejects_zero_fallback_settings() {
        let transport = MockTransport::always_failing();
        let registry = ConnectionRegistry::new(Arc::new(transport.clone()));

        for fallback in [
            FallbackConfig {
                poll_interval_ms: 0,
                page_size: 100,
            },
            FallbackConfig {
                poll_interval_ms: 30_000,
                page_size: 0,
            },
        ] {
            let result = LiveFeed::start(
                registry.clone(),
                quick_failure(),
                Arc::new(StubSource::default()),
                fallback,
            );
            assert!(matches!(result, Err(Error::ConfigError(_))));
        }

        settle().await;
        assert!(registry.is_empty());
        assert_eq!(transport.open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_poll_period_still_polls() {
        let cancel = CancellationToken::new();
        let source = Arc::new(StubSource::default());
        let transport = MockTransport::new();
        let feed = start(&transport, ConnectConfig::new(URL), source.clone());

        let task = tokio::spawn(poll_loop(
            Arc::downgrade(&feed.shared),
            cancel.clone(),
            Duration::ZERO,
        ));
        tokio::time::sleep(Duration::from_millis(5)).await;
        cancel.cancel();
        task.await.unwrap();

        assert!(source.cycles() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_read_counts_as_empty() {
        let transport = MockTransport::new();
        let source = Arc::new(StubSource::default());
        source.fail_cashouts.store(true, Ordering::SeqCst);
        let feed = start(&transport, ConnectConfig::new(URL), source.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        feed.subscribe_to_transaction_updates(Arc::new(move |items: &[Transaction], _: bool| {
            sink.lock().unwrap().extend(items.iter().map(|t| t.id.clone()));
        }));

        assert!(feed.refresh_data().await);
        assert_eq!(*seen.lock().unwrap(), vec!["p1".to_string()]);
        assert_eq!(
            feed.counts(),
            ProcessingCounts {
                pending_purchases: 3,
                pending_cashouts: 0,
                pending_game_activities: 2,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_status_sees_connection_open() {
        let transport = MockTransport::new();
        let feed = start(&transport, ConnectConfig::new(URL), Arc::new(StubSource::default()));
        settle().await;

        let mut status = feed.watch_status();
        assert!(status.borrow_and_update().is_connecting);

        transport.session(0).unwrap().open();
        status.changed().await.unwrap();
        assert!(status.borrow().is_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_detaches_and_stops_polling() {
        let transport = MockTransport::always_failing();
        let source = Arc::new(StubSource::default());
        let feed = start(&transport, quick_failure(), source.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.cycles(), 1);

        drop(feed);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(source.cycles(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_shared_connection() {
        let transport = MockTransport::new();
        let registry = ConnectionRegistry::new(Arc::new(transport.clone()));
        let feed = LiveFeed::start(
            registry.clone(),
            ConnectConfig::new(URL),
            Arc::new(StubSource::default()),
            FallbackConfig::default(),
        )
        .unwrap();
        settle().await;
        transport.session(0).unwrap().open();
        settle().await;

        assert!(feed.send(&json!({"action": "ping"})));
        feed.shutdown();
        assert!(registry.is_empty());
        assert!(!feed.send(&json!({"action": "ping"})));
    }
}

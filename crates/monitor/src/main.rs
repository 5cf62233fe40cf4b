//! Livefeed monitor
//!
//! Attaches a [`LiveFeed`] to the configured dashboard endpoint and logs
//! everything it publishes until Ctrl-C.

use livefeed_core::{DashboardConfig, QueueItem, Transaction};
use livefeed_feed::LiveFeed;
use livefeed_networking::websocket::{endpoint_url, ConnectConfig, ConnectionRegistry, WsTransport};
use livefeed_networking::DashboardClient;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "livefeed=debug,livefeed_networking=info,livefeed_feed=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting livefeed monitor");

    let config = DashboardConfig::load()?;
    let url = endpoint_url(&config.websocket)?;
    let client = DashboardClient::new(&config.api_base_url)?;
    info!("Socket endpoint: {}", url);
    info!("API base: {}", client.api_base());

    let registry = ConnectionRegistry::new(Arc::new(WsTransport));
    let feed = LiveFeed::start(
        registry.clone(),
        ConnectConfig::new(url).with_reconnect(config.reconnect.clone()),
        Arc::new(client),
        config.fallback.clone(),
    )?;

    feed.subscribe_to_queue_updates(Arc::new(|items: &[QueueItem], initial: bool| {
        if initial {
            info!("Queue snapshot: {} pending items", items.len());
        } else {
            for item in items {
                info!("Queue update: {} {} ({})", item.id, item.operation, item.status);
            }
        }
    }));
    feed.subscribe_to_transaction_updates(Arc::new(|txs: &[Transaction], initial: bool| {
        if initial {
            info!("Transaction snapshot: {} pending", txs.len());
        } else {
            for tx in txs {
                info!(
                    "Transaction update: {} {:?} {} ({})",
                    tx.id, tx.kind, tx.amount, tx.status
                );
            }
        }
    }));
    feed.subscribe_to_messages(Arc::new(|message: &Value, _: bool| {
        let kind = message.get("type").and_then(Value::as_str).unwrap_or("untyped");
        debug!("Message: {}", kind);
    }));

    let mut status = feed.watch_status();
    let watcher = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            match &current.error {
                Some(err) if !current.is_connected => warn!(
                    "Feed {} (attempt {}): {}",
                    current.mode(),
                    current.reconnect_attempts,
                    err
                ),
                _ => info!(
                    "Feed {} | purchases {} cashouts {} activities {}",
                    current.mode(),
                    current.counts.pending_purchases,
                    current.counts.pending_cashouts,
                    current.counts.pending_game_activities
                ),
            }
        }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }

    info!("Shutting down");
    feed.shutdown();
    registry.close_all();
    drop(feed);
    watcher.abort();

    Ok(())
}

//! Where fallback fetch cycles read pending work from

use async_trait::async_trait;
use livefeed_core::{Page, QueueItem, Result, Transaction};
use livefeed_networking::api;
use livefeed_networking::DashboardClient;

/// Read side used while the live connection is down
#[async_trait]
pub trait FeedSource: Send + Sync + 'static {
    async fn pending_purchases(&self, page_size: u32) -> Result<Page<Transaction>>;
    async fn pending_cashouts(&self, page_size: u32) -> Result<Page<Transaction>>;
    async fn pending_activities(&self, page_size: u32) -> Result<Page<QueueItem>>;
}

#[async_trait]
impl FeedSource for DashboardClient {
    async fn pending_purchases(&self, page_size: u32) -> Result<Page<Transaction>> {
        api::fetch_pending_purchases(self, page_size).await
    }

    async fn pending_cashouts(&self, page_size: u32) -> Result<Page<Transaction>> {
        api::fetch_pending_cashouts(self, page_size).await
    }

    async fn pending_activities(&self, page_size: u32) -> Result<Page<QueueItem>> {
        api::fetch_pending_activities(self, page_size).await
    }
}

//! Pending-work reads used to rebuild the live feed over HTTP

use crate::DashboardClient;
use livefeed_core::{Error, Page, QueueItem, Result, Transaction, TransactionKind};
use tracing::debug;

const PENDING: &str = "pending";

fn check_page_size(page_size: u32) -> Result<()> {
    if page_size == 0 {
        return Err(Error::InvalidData("Page size must be positive".to_string()));
    }
    Ok(())
}

/// Fetch every pending purchase (up to `page_size`)
pub async fn fetch_pending_purchases(
    client: &DashboardClient,
    page_size: u32,
) -> Result<Page<Transaction>> {
    check_page_size(page_size)?;
    client
        .list_transactions(TransactionKind::Purchase, PENDING, page_size)
        .await
}

/// Fetch every pending cashout (up to `page_size`)
pub async fn fetch_pending_cashouts(
    client: &DashboardClient,
    page_size: u32,
) -> Result<Page<Transaction>> {
    check_page_size(page_size)?;
    client
        .list_transactions(TransactionKind::Cashout, PENDING, page_size)
        .await
}

/// Fetch the pending game-activity queue (up to `page_size`)
pub async fn fetch_pending_activities(
    client: &DashboardClient,
    page_size: u32,
) -> Result<Page<QueueItem>> {
    check_page_size(page_size)?;
    let page = client.list_game_activities(PENDING, page_size).await?;
    if page.count > page.len() as u64 {
        debug!(
            "Activity queue truncated: {} of {} items fit in one page",
            page.len(),
            page.count
        );
    }
    Ok(page)
}

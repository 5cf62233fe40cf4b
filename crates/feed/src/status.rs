//! Feed status snapshot

use chrono::{DateTime, Utc};
use livefeed_core::ProcessingCounts;
use serde::Serialize;

/// What the UI needs to render the connection badge and counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedStatus {
    pub is_connected: bool,
    pub is_connecting: bool,
    /// Last transport error or fallback notice
    pub error: Option<String>,
    pub reconnect_attempts: u32,
    pub counts: ProcessingCounts,
    pub is_using_fallback: bool,
    /// Completion time of the last fetch cycle
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

impl FeedStatus {
    /// Short label for logs
    pub fn mode(&self) -> &'static str {
        if self.is_connected {
            "live"
        } else if self.is_using_fallback {
            "polling"
        } else if self.is_connecting {
            "connecting"
        } else {
            "offline"
        }
    }
}

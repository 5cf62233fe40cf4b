//! Game-activity queue models

use super::de::{deserialize_f64_lenient, deserialize_id, deserialize_id_option};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One queued game operation (recharge, redeem, account creation, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "deserialize_id_option")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub game: Option<String>,
    #[serde(default, deserialize_with = "deserialize_f64_lenient")]
    pub amount: f64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn is_pending(&self) -> bool {
        self.status.eq_ignore_ascii_case("pending")
    }
}

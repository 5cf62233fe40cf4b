//! Purchase / cashout transaction models

use super::de::{deserialize_f64_lenient, deserialize_id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transaction kind as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Purchase,
    Cashout,
    #[serde(other)]
    Other,
}

impl TransactionKind {
    /// Query-string value used by the transactions list endpoint
    pub fn as_query(&self) -> &'static str {
        match self {
            TransactionKind::Purchase => "purchase",
            TransactionKind::Cashout => "cashout",
            TransactionKind::Other => "other",
        }
    }
}

/// A purchase or cashout record
///
/// Used both for paginated list results and for `transaction_update` live
/// messages; consumers merge them by `id` (last write wins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "deserialize_f64_lenient")]
    pub amount: f64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub game: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn is_pending(&self) -> bool {
        self.status.eq_ignore_ascii_case("pending")
    }
}

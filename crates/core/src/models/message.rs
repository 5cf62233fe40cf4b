//! Typed view over inbound live messages

use super::{ProcessingCounts, QueueItem, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Live messages the feed understands
///
/// Wire shape is `{"type": "...", "data": {...}}`. Objects with any other
/// `type` (chat messages, heartbeats) are still valid raw messages; they just
/// have no typed counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum FeedMessage {
    QueueUpdate(QueueItem),
    TransactionUpdate(Transaction),
    ProcessingCounts(ProcessingCounts),
}

impl FeedMessage {
    /// Interpret an already-parsed JSON payload, if it is a known message type
    pub fn from_value(value: &Value) -> Option<Self> {
        FeedMessage::deserialize(value).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransactionKind;

    #[test]
    fn test_transaction_update_is_typed() {
        let raw = serde_json::json!({
            "type": "transaction_update",
            "data": { "id": 9, "type": "purchase", "status": "pending", "amount": 20 }
        });

        match FeedMessage::from_value(&raw) {
            Some(FeedMessage::TransactionUpdate(tx)) => {
                assert_eq!(tx.id, "9");
                assert_eq!(tx.kind, TransactionKind::Purchase);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_chat_message_has_no_typed_form() {
        let raw = serde_json::json!({
            "type": "chat_message",
            "data": { "from": "support", "text": "hi" }
        });
        assert!(FeedMessage::from_value(&raw).is_none());
    }

    #[test]
    fn test_counts_message() {
        let raw = serde_json::json!({
            "type": "processing_counts",
            "data": { "pending_purchases": 4, "pending_cashouts": 1, "pending_game_activities": 7 }
        });
        assert_eq!(
            FeedMessage::from_value(&raw),
            Some(FeedMessage::ProcessingCounts(ProcessingCounts {
                pending_purchases: 4,
                pending_cashouts: 1,
                pending_game_activities: 7,
            }))
        );
    }
}

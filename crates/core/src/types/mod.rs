//! Shared type definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Subscription topics exposed to the rest of the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    QueueUpdates,
    TransactionUpdates,
    RawMessages,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topic::QueueUpdates => "queue-updates",
            Topic::TransactionUpdates => "transaction-updates",
            Topic::RawMessages => "raw-messages",
        };
        f.write_str(name)
    }
}

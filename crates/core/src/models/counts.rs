//! Processing counters shown in the dashboard header

use super::de::deserialize_count;
use serde::{Deserialize, Serialize};

/// Latest known snapshot of pending work
///
/// Always replaced as a whole; a new snapshot never merges into the old one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingCounts {
    #[serde(default, alias = "purchases", deserialize_with = "deserialize_count")]
    pub pending_purchases: u64,
    #[serde(default, alias = "cashouts", deserialize_with = "deserialize_count")]
    pub pending_cashouts: u64,
    #[serde(default, alias = "game_activities", deserialize_with = "deserialize_count")]
    pub pending_game_activities: u64,
}

impl ProcessingCounts {
    pub fn total(&self) -> u64 {
        self.pending_purchases + self.pending_cashouts + self.pending_game_activities
    }
}

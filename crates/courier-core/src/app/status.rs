//! Status - 運用者向けのスナップショット

use serde::{Deserialize, Serialize};

use crate::domain::SchedulerState;
use crate::ports::OutboxCounts;

/// Point-in-time view of one outbox instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxStatus {
    pub instance: Option<String>,
    /// `None` when delivery is disabled.
    pub sink: Option<String>,
    pub scheduler: SchedulerState,
    pub max_failures: u32,
    #[serde(flatten)]
    pub counts: OutboxCounts,
}

impl OutboxStatus {
    pub fn delivery_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Nothing left to send and nothing stuck.
    pub fn is_settled(&self) -> bool {
        self.counts.pending == 0 && self.counts.abandoned == 0
    }
}

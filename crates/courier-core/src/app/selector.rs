//! BatchSelector - 次に送るバッチの選択
//!
//! `limit + 1` 件取得して、`limit` を超えたら切り詰めて `has_more = true`。
//! backlog の有無はこの `has_more` だけで判断します。

use crate::domain::{QueuedEvent, StoreError};
use crate::ports::OutboxStore;

/// Records chosen for one delivery cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub events: Vec<QueuedEvent>,
    /// More pending records exist beyond this batch.
    pub has_more: bool,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchSelector {
    batch_limit: usize,
    max_failures: u32,
}

impl BatchSelector {
    pub fn new(batch_limit: usize, max_failures: u32) -> Self {
        Self {
            batch_limit,
            max_failures,
        }
    }

    pub fn max_failures(&self) -> u32 {
        self.max_failures
    }

    pub async fn select(&self, store: &dyn OutboxStore) -> Result<Batch, StoreError> {
        let mut events = store
            .select_batch(self.max_failures, self.batch_limit.saturating_add(1))
            .await?;
        let has_more = events.len() > self.batch_limit;
        events.truncate(self.batch_limit);
        Ok(Batch { events, has_more })
    }
}

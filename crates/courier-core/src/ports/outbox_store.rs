//! OutboxStore port - 配送待ちイベントの正本（source of truth）
//!
//! # 設計原則
//! - 各操作は 1 回の呼び出しで atomic（複数行の更新は同一トランザクション）
//! - 並行 cycle の排除は Scheduler の single-flight で行う（store 側ではロックしない）
//! - abandoned レコードは自動削除しない（`purge_abandoned` は運用者が明示的に呼ぶ）

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{EventId, QueuedEvent, StoreError};

/// Row counts by logical state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxCounts {
    pub pending: u64,
    pub abandoned: u64,
    /// Rows retained with `sent_at` (only under the mark-sent policy).
    pub sent: u64,
}

impl OutboxCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.abandoned + self.sent
    }
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Create the backing table if absent. Idempotent.
    async fn bootstrap(&self) -> Result<(), StoreError>;

    /// Persist a new record. Fails with `DuplicateId` if the id is taken.
    async fn insert(&self, event: QueuedEvent) -> Result<EventId, StoreError>;

    /// Up to `limit` unsent records with `failure_count < max_failures`, oldest id first.
    async fn select_batch(
        &self,
        max_failures: u32,
        limit: usize,
    ) -> Result<Vec<QueuedEvent>, StoreError>;

    /// Remove the given records. Missing ids are ignored. Returns rows removed.
    async fn delete_by_ids(&self, ids: &[EventId]) -> Result<u64, StoreError>;

    /// Add one to `failure_count` for each given record. Returns rows touched.
    async fn increment_failures(&self, ids: &[EventId]) -> Result<u64, StoreError>;

    /// Retain the records but stamp `sent_at`, excluding them from selection.
    async fn mark_sent(&self, ids: &[EventId], at: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn counts(&self, max_failures: u32) -> Result<OutboxCounts, StoreError>;

    /// Abandoned records, oldest id first.
    async fn list_abandoned(
        &self,
        max_failures: u32,
        limit: usize,
    ) -> Result<Vec<QueuedEvent>, StoreError>;

    /// Delete every abandoned record. Returns rows removed.
    async fn purge_abandoned(&self, max_failures: u32) -> Result<u64, StoreError>;
}

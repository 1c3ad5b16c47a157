//! In-memory outbox store.
//!
//! Not durable: intended for tests and for embedding where losing queued
//! events on restart is acceptable.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{EventId, QueuedEvent, RecordState, StoreError};
use crate::ports::{OutboxCounts, OutboxStore};

/// One stored row: the event plus its terminal-state stamp.
#[derive(Debug, Clone)]
struct StoredRow {
    event: QueuedEvent,
    sent_at: Option<DateTime<Utc>>,
}

impl StoredRow {
    fn is_pending(&self, max_failures: u32) -> bool {
        self.sent_at.is_none()
            && RecordState::classify(self.event.failure_count, max_failures).is_selectable()
    }

    fn is_abandoned(&self, max_failures: u32) -> bool {
        self.sent_at.is_none()
            && RecordState::classify(self.event.failure_count, max_failures)
                == RecordState::Abandoned
    }
}

#[derive(Default)]
struct InMemoryStoreState {
    /// Ordered by id, so iteration is FIFO.
    rows: BTreeMap<EventId, StoredRow>,
    bootstrapped: bool,
}

/// In-memory store backed by an ordered map.
///
/// Cloning shares the same underlying rows.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    state: Arc<Mutex<InMemoryStoreState>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows in any state.
    pub async fn len(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of a single row (for assertions).
    pub async fn get(&self, id: EventId) -> Option<QueuedEvent> {
        self.state.lock().await.rows.get(&id).map(|row| row.event.clone())
    }

    pub async fn is_bootstrapped(&self) -> bool {
        self.state.lock().await.bootstrapped
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn bootstrap(&self) -> Result<(), StoreError> {
        self.state.lock().await.bootstrapped = true;
        Ok(())
    }

    async fn insert(&self, event: QueuedEvent) -> Result<EventId, StoreError> {
        let mut state = self.state.lock().await;
        let id = event.id;
        if state.rows.contains_key(&id) {
            return Err(StoreError::DuplicateId(id.to_canonical()));
        }
        state.rows.insert(id, StoredRow { event, sent_at: None });
        Ok(id)
    }

    async fn select_batch(
        &self,
        max_failures: u32,
        limit: usize,
    ) -> Result<Vec<QueuedEvent>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .values()
            .filter(|row| row.is_pending(max_failures))
            .take(limit)
            .map(|row| row.event.clone())
            .collect())
    }

    async fn delete_by_ids(&self, ids: &[EventId]) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let removed = ids.iter().filter(|id| state.rows.remove(id).is_some()).count();
        Ok(removed as u64)
    }

    async fn increment_failures(&self, ids: &[EventId]) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let mut touched = 0;
        for id in ids {
            if let Some(row) = state.rows.get_mut(id) {
                row.event.failure_count = row.event.failure_count.saturating_add(1);
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn mark_sent(&self, ids: &[EventId], at: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let mut touched = 0;
        for id in ids {
            if let Some(row) = state.rows.get_mut(id) {
                row.sent_at = Some(at);
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn counts(&self, max_failures: u32) -> Result<OutboxCounts, StoreError> {
        let state = self.state.lock().await;
        let mut counts = OutboxCounts::default();
        for row in state.rows.values() {
            if row.sent_at.is_some() {
                counts.sent += 1;
            } else if row.is_abandoned(max_failures) {
                counts.abandoned += 1;
            } else {
                counts.pending += 1;
            }
        }
        Ok(counts)
    }

    async fn list_abandoned(
        &self,
        max_failures: u32,
        limit: usize,
    ) -> Result<Vec<QueuedEvent>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .values()
            .filter(|row| row.is_abandoned(max_failures))
            .take(limit)
            .map(|row| row.event.clone())
            .collect())
    }

    async fn purge_abandoned(&self, max_failures: u32) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.rows.len();
        state.rows.retain(|_, row| !row.is_abandoned(max_failures));
        Ok((before - state.rows.len()) as u64)
    }
}

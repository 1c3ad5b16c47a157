//! Outbox - イベントソース・運用者向けの入口
//!
//! `enqueue` は store への書き込みが成功した時点で成功です。
//! 配送エラーや配送中の store エラーは呼び出し側には返らず、ログに残るだけ。

use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::{EventId, NewEvent, OutboxError, QueuedEvent, SchedulerState};
use crate::ports::{IdGenerator, OutboxStore};

use super::builder::OutboxSettings;
use super::scheduler::Scheduler;
use super::status::OutboxStatus;

/// One forwarding outbox: a store, its scheduler, and optionally a sink.
///
/// Built with [`OutboxBuilder`](super::OutboxBuilder). Instances are fully
/// independent; two outboxes over different stores never share scheduling state.
pub struct Outbox {
    store: Arc<dyn OutboxStore>,
    ids: Arc<dyn IdGenerator>,
    scheduler: Scheduler,
    settings: OutboxSettings,
    sink: Option<String>,
}

impl Outbox {
    pub(crate) fn new(
        store: Arc<dyn OutboxStore>,
        ids: Arc<dyn IdGenerator>,
        scheduler: Scheduler,
        settings: OutboxSettings,
    ) -> Self {
        let sink = scheduler.sink_description();
        Self {
            store,
            ids,
            scheduler,
            settings,
            sink,
        }
    }

    pub fn settings(&self) -> &OutboxSettings {
        &self.settings
    }

    pub fn delivery_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Create the backing table if needed. Does not schedule delivery.
    pub async fn bootstrap(&self) -> Result<(), OutboxError> {
        Ok(self.store.bootstrap().await?)
    }

    /// Bootstrap, then retry whatever a previous run left behind.
    pub async fn start(&self) -> Result<(), OutboxError> {
        self.bootstrap().await?;
        debug!(instance = ?self.settings.instance, "outbox started");
        self.scheduler.trigger();
        Ok(())
    }

    /// Durably queue an event and schedule delivery. Returns the new id.
    pub async fn enqueue(&self, event: NewEvent) -> Result<EventId, OutboxError> {
        let id = self.ids.generate_event_id();
        let event_name = event.event_name.clone();
        self.store.insert(event.into_queued(id)).await?;
        debug!(event_id = %id, event = %event_name, "event queued");

        self.scheduler.trigger();
        Ok(id)
    }

    /// Schedule a delivery cycle without enqueueing anything.
    pub fn flush(&self) -> bool {
        self.scheduler.trigger()
    }

    pub async fn status(&self) -> Result<OutboxStatus, OutboxError> {
        let counts = self.store.counts(self.settings.max_failures).await?;
        Ok(OutboxStatus {
            instance: self.settings.instance.clone(),
            sink: self.sink.clone(),
            scheduler: self.scheduler.state(),
            max_failures: self.settings.max_failures,
            counts,
        })
    }

    /// Records that hit the failure ceiling, oldest first.
    pub async fn abandoned(&self, limit: usize) -> Result<Vec<QueuedEvent>, OutboxError> {
        Ok(self
            .store
            .list_abandoned(self.settings.max_failures, limit)
            .await?)
    }

    /// Delete every abandoned record. Returns how many were removed.
    pub async fn purge_abandoned(&self) -> Result<u64, OutboxError> {
        let removed = self.store.purge_abandoned(self.settings.max_failures).await?;
        info!(removed, "purged abandoned events");
        Ok(removed)
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Wait for the scheduler to go idle.
    pub async fn drain(&self) {
        self.scheduler.drain().await;
    }

    /// Stop scheduling new cycles and wait for the current one. Enqueue keeps
    /// storing records; they are picked up by the next `start`.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}

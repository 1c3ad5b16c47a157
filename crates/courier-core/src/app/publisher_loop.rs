//! PublisherLoop - 1 回の配送サイクル
//!
//! # フロー
//! 1. BatchSelector で pending レコードを最大 `batch_limit` 件取得
//! 2. DeliverySink で 1 リクエスト送信
//! 3. 成功: 削除（または `sent_at` を記録）。`has_more` なら再実行
//! 4. 失敗: 全レコードの failure_count を +1。常に再実行
//!
//! store エラーは呼び出し側（Scheduler）に返し、サイクルを中断します。
//! 流量制限と single-flight は Scheduler の責務で、ここでは扱いません。

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::SuccessPolicy;
use crate::domain::{CycleId, DeliveryError, DeliveryOutcome, EventId, StoreError};
use crate::ports::{Clock, DeliverySink, IdGenerator, OutboxStore};

use super::selector::BatchSelector;

/// What one cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleResult {
    /// Nothing pending.
    Empty,
    Delivered { count: usize, has_more: bool },
    Failed {
        count: usize,
        /// Records whose failure count just reached the ceiling.
        newly_abandoned: usize,
        error: DeliveryError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle_id: CycleId,
    pub result: CycleResult,
}

impl CycleReport {
    /// Should the scheduler run another cycle right away?
    pub fn wants_rerun(&self) -> bool {
        match &self.result {
            CycleResult::Empty => false,
            CycleResult::Delivered { has_more, .. } => *has_more,
            CycleResult::Failed { .. } => true,
        }
    }
}

pub struct PublisherLoop {
    store: Arc<dyn OutboxStore>,
    sink: Arc<dyn DeliverySink>,
    selector: BatchSelector,
    on_success: SuccessPolicy,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    instance: Option<String>,
}

impl PublisherLoop {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        sink: Arc<dyn DeliverySink>,
        selector: BatchSelector,
        on_success: SuccessPolicy,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store,
            sink,
            selector,
            on_success,
            clock,
            ids,
            instance: None,
        }
    }

    pub fn with_instance(mut self, instance: Option<String>) -> Self {
        self.instance = instance;
        self
    }

    pub fn sink(&self) -> &dyn DeliverySink {
        self.sink.as_ref()
    }

    pub async fn run_cycle(&self) -> Result<CycleReport, StoreError> {
        let cycle_id = self.ids.generate_cycle_id();
        let instance = self.instance.as_deref().unwrap_or("-");

        let batch = self.selector.select(self.store.as_ref()).await?;
        if batch.is_empty() {
            debug!(cycle = %cycle_id, instance, "nothing to deliver");
            return Ok(CycleReport {
                cycle_id,
                result: CycleResult::Empty,
            });
        }

        let ids: Vec<EventId> = batch.events.iter().map(|e| e.id).collect();
        debug!(
            cycle = %cycle_id,
            instance,
            batch = ids.len(),
            has_more = batch.has_more,
            sink = %self.sink.describe(),
            "delivering batch"
        );

        let result = match self.sink.send(&batch.events).await {
            DeliveryOutcome::Success { status } => {
                let settled = match self.on_success {
                    SuccessPolicy::Delete => self.store.delete_by_ids(&ids).await?,
                    SuccessPolicy::MarkSent => {
                        self.store.mark_sent(&ids, self.clock.now()).await?
                    }
                };
                info!(
                    cycle = %cycle_id,
                    instance,
                    batch = ids.len(),
                    settled,
                    status,
                    has_more = batch.has_more,
                    "batch delivered"
                );
                CycleResult::Delivered {
                    count: ids.len(),
                    has_more: batch.has_more,
                }
            }
            DeliveryOutcome::Failure(error) => {
                warn!(
                    cycle = %cycle_id,
                    instance,
                    batch = ids.len(),
                    status = error.status(),
                    error = %error,
                    "batch delivery failed"
                );
                self.store.increment_failures(&ids).await?;

                let max_failures = self.selector.max_failures();
                let newly_abandoned = batch
                    .events
                    .iter()
                    .filter(|e| e.abandons_after_next_failure(max_failures))
                    .inspect(|e| {
                        warn!(
                            event_id = %e.id,
                            event = %e.event_name,
                            max_failures,
                            "event abandoned after repeated delivery failures"
                        )
                    })
                    .count();

                CycleResult::Failed {
                    count: ids.len(),
                    newly_abandoned,
                    error,
                }
            }
        };

        Ok(CycleReport { cycle_id, result })
    }
}

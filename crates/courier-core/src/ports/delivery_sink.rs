//! DeliverySink port - 外部 sink への配送
//!
//! sink は 1 バッチを 1 リクエストで送り、結果を分類して返すだけです。
//! store の更新（削除・failure_count 加算）は Scheduler 側の責務。

use async_trait::async_trait;

use crate::domain::{DeliveryOutcome, QueuedEvent};

#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Send the whole batch in one request. Never errors: failures are an outcome.
    async fn send(&self, batch: &[QueuedEvent]) -> DeliveryOutcome;

    /// Human-readable target for logs (URL, "memory", ...).
    fn describe(&self) -> String;
}

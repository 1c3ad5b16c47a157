//! RecordingSink - テスト・開発用の sink
//!
//! ネットワークを使わずに配送を記録します。
//! - 返す outcome を順番に指定できる（`script`）。尽きたら `fallback` を返す
//! - `with_delay` で配送に時間をかけ、single-flight の検証に使える
//! - 同時に走った `send` の最大数を記録する

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{DeliveryOutcome, EventId, QueuedEvent};
use crate::ports::DeliverySink;

pub struct RecordingSink {
    scripted: Mutex<VecDeque<DeliveryOutcome>>,
    fallback: DeliveryOutcome,
    delay: Option<Duration>,
    batches: Mutex<Vec<Vec<EventId>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingSink {
    /// Accepts every batch with HTTP 200.
    pub fn new() -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            fallback: DeliveryOutcome::Success { status: 200 },
            delay: None,
            batches: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Outcomes returned by the next calls, in order.
    pub fn script(self, outcomes: impl IntoIterator<Item = DeliveryOutcome>) -> Self {
        self.scripted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(outcomes);
        self
    }

    /// Outcome once the script runs out.
    pub fn with_fallback(mut self, outcome: DeliveryOutcome) -> Self {
        self.fallback = outcome;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Ids of every batch sent so far, in call order.
    pub fn batches(&self) -> Vec<Vec<EventId>> {
        self.batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn calls(&self) -> usize {
        self.batches().len()
    }

    /// Highest number of `send` calls observed running at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> DeliveryOutcome {
        self.scripted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn send(&self, batch: &[QueuedEvent]) -> DeliveryOutcome {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        self.batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(batch.iter().map(|e| e.id).collect());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.next_outcome()
    }

    fn describe(&self) -> String {
        "recording".to_string()
    }
}

//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: 単調増加 ULID（本番用）

use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use ulid::{Generator, Ulid};

use crate::domain::ids::{CycleId, EventId};
use crate::ports::Clock;

/// IdGenerator は outbox で使う ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数タスクから enqueue される）
pub trait IdGenerator: Send + Sync {
    fn generate_event_id(&self) -> EventId;

    fn generate_cycle_id(&self) -> CycleId;
}

/// UlidGenerator は Clock ベースの単調増加 ULID 生成器
///
/// 同一ミリ秒内でも random 部をインクリメントするので、
/// 生成順 == ソート順 が保証されます（FIFO の前提）。
pub struct UlidGenerator<C> {
    clock: C,
    monotonic: Mutex<Generator>,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            monotonic: Mutex::new(Generator::new()),
        }
    }

    fn next_ulid(&self) -> Ulid {
        let now = SystemTime::from(self.clock.now());
        let mut generator = self
            .monotonic
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // random 部が溢れた場合（同一ミリ秒に 2^80 件）は単調性を諦めて新規生成
        generator
            .generate_from_datetime(now)
            .unwrap_or_else(|_| Ulid::from_datetime(now))
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_event_id(&self) -> EventId {
        EventId::from(self.next_ulid())
    }

    fn generate_cycle_id(&self) -> CycleId {
        CycleId::from(Ulid::from_parts(
            self.clock.now().timestamp_millis() as u64,
            rand::random(),
        ))
    }
}

impl<G: IdGenerator + ?Sized> IdGenerator for Arc<G> {
    fn generate_event_id(&self) -> EventId {
        (**self).generate_event_id()
    }

    fn generate_cycle_id(&self) -> CycleId {
        (**self).generate_cycle_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.generate_event_id();
        let id2 = id_gen.generate_event_id();
        let id3 = id_gen.generate_event_id();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn ids_within_one_millisecond_stay_ordered() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let ids: Vec<EventId> = (0..100).map(|_| id_gen.generate_event_id()).collect();

        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);

        // timestamp 部分は全て同じ
        for id in &ids {
            assert_eq!(id.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
        }
    }

    #[test]
    fn cycle_ids_use_their_own_prefix() {
        let id_gen = UlidGenerator::new(SystemClock);
        assert!(id_gen.generate_cycle_id().to_string().starts_with("cycle-"));
        assert!(id_gen.generate_event_id().to_string().starts_with("evt-"));
    }
}

//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。各 trait は外部システム
//! （SQLite、HTTP sink、時計）へのインターフェースで、実装は `impls` に置きます。

pub mod clock;
pub mod delivery_sink;
pub mod id_generator;
pub mod outbox_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::delivery_sink::DeliverySink;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::outbox_store::{OutboxCounts, OutboxStore};

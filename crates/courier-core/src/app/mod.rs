//! App - アプリケーション層
//!
//! ports を組み合わせて outbox の振る舞いを実装します。
//!
//! # 主要コンポーネント
//! - **OutboxBuilder**: Outbox の構築とワイヤリング（起動時検証）
//! - **Outbox**: enqueue と運用向け操作の入口
//! - **Scheduler**: single-flight + 流量制限の配送ドライバ
//! - **PublisherLoop**: 1 回の配送サイクル（select→send→delete / increment）
//! - **BatchSelector**: 次のバッチと backlog の判定
//! - **RateLimiter**: leaky bucket

pub mod builder;
pub mod outbox;
pub mod publisher_loop;
pub mod rate_limit;
pub mod scheduler;
pub mod selector;
pub mod status;

pub use self::builder::{BuildError, OutboxBuilder, OutboxSettings};
pub use self::outbox::Outbox;
pub use self::publisher_loop::{CycleReport, CycleResult, PublisherLoop};
pub use self::rate_limit::RateLimiter;
pub use self::scheduler::Scheduler;
pub use self::selector::{Batch, BatchSelector};
pub use self::status::OutboxStatus;

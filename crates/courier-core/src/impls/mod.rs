//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryOutboxStore**: テスト・組み込み用の store（永続化なし）
//! - **SqliteOutboxStore**: 本番用の store（tokio-rusqlite）
//! - **HttpSink**: 本番用の sink（reqwest）
//! - **RecordingSink**: テスト用の sink（ネットワークなし）

pub mod http_sink;
pub mod memory_store;
pub mod recording_sink;
pub mod sqlite_store;

pub use self::http_sink::{HttpSink, SinkOptions};
pub use self::memory_store::InMemoryOutboxStore;
pub use self::recording_sink::RecordingSink;
pub use self::sqlite_store::SqliteOutboxStore;

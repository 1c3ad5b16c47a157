//! Errors - エラー型と分類
//!
//! - `StoreError`: 永続化層の障害。その cycle は中断、次の trigger で再試行
//! - `DeliveryError`（outcome.rs）: 配送失敗。レコードごとに failure_count を加算
//! - `ConfigError`（config.rs）: 設定の読み込み・検証エラー
//! - `BuildError`（app/builder.rs）: Outbox 構築時の設定検証エラー
//!
//! sink 未設定はエラーではなく、配送が no-op になるだけです。

use thiserror::Error;

use crate::app::BuildError;
use crate::config::ConfigError;

/// Durable store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable, closed, or the statement failed.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A row could not be decoded back into a `QueuedEvent`.
    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("duplicate event id {0}")]
    DuplicateId(String),
}

impl StoreError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        StoreError::Unavailable(err.to_string())
    }

    pub fn corrupt(id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        StoreError::Corrupt {
            id: id.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors surfaced by the public outbox API.
///
/// Delivery failures never show up here: they are handled inside the
/// scheduler and only logged.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

//! courier-core
//!
//! Durable, rate-limited event-forwarding outbox.
//!
//! Events are written to a local store first, then delivered in batches to an
//! HTTP sink by a per-instance, single-flight scheduler. Failed deliveries are
//! retried until a record reaches its failure ceiling, after which it is kept
//! as abandoned for an operator to inspect or purge.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, event, state, outcome, errors）
//! - **ports**: 抽象化レイヤー（OutboxStore, DeliverySink, Clock, IdGenerator）
//! - **impls**: 実装（SQLite / in-memory store、HTTP / recording sink）
//! - **app**: アプリケーションロジック（builder, outbox, scheduler, publisher_loop, など）
//! - **config**: 設定の読み込み（figment: defaults → TOML → env）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{Outbox, OutboxBuilder, OutboxStatus};
pub use config::CourierConfig;
pub use domain::{EventId, NewEvent, OutboxError};

//! OutboxBuilder - Outbox の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - store は必須。sink は任意（なければ配送は no-op）
//! - `build()` 時に設定値を検証し、不正なら BuildError を返す
//! - 各 Outbox は自分専用の Scheduler と RateLimiter を持つ（インスタンス間で共有しない）

use std::sync::Arc;
use std::time::Duration;

use crate::config::{ForwardConfig, SuccessPolicy};
use crate::domain::OutboxError;
use crate::impls::HttpSink;
use crate::ports::{Clock, DeliverySink, IdGenerator, OutboxStore, SystemClock, UlidGenerator};

use super::outbox::Outbox;
use super::publisher_loop::PublisherLoop;
use super::rate_limit::RateLimiter;
use super::scheduler::Scheduler;
use super::selector::BatchSelector;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("an outbox store is required")]
    MissingStore,

    #[error("invalid setting {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },
}

/// Tunables for one outbox instance.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxSettings {
    pub instance: Option<String>,
    pub batch_limit: usize,
    pub max_failures: u32,
    pub max_rate: f64,
    pub time_period: Duration,
    pub on_success: SuccessPolicy,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self::from(&ForwardConfig::default())
    }
}

impl From<&ForwardConfig> for OutboxSettings {
    fn from(config: &ForwardConfig) -> Self {
        Self {
            instance: config.instance.clone().filter(|s| !s.is_empty()),
            batch_limit: config.batch_limit,
            max_failures: config.max_failures,
            max_rate: config.max_rate,
            time_period: config.time_window(),
            on_success: config.on_success,
        }
    }
}

impl OutboxSettings {
    fn validate(&self) -> Result<(), BuildError> {
        if self.batch_limit == 0 {
            return Err(invalid("batch_limit", "must be at least 1"));
        }
        if self.max_failures == 0 {
            return Err(invalid("max_failures", "must be at least 1"));
        }
        if !(self.max_rate.is_finite() && self.max_rate > 0.0) {
            return Err(invalid("max_rate", "must be a positive number"));
        }
        if self.time_period.is_zero() {
            return Err(invalid("time_period", "must be longer than zero"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> BuildError {
    BuildError::InvalidSetting {
        field,
        reason: reason.to_string(),
    }
}

/// OutboxBuilder は Outbox を構築
///
/// # 使用例
/// ```ignore
/// let outbox = OutboxBuilder::new()
///     .store(Arc::new(SqliteOutboxStore::open("courier.db").await?))
///     .sink(Arc::new(HttpSink::new(url, SinkOptions::default())?))
///     .batch_limit(50)
///     .build()?;
/// outbox.start().await?;
/// ```
pub struct OutboxBuilder {
    store: Option<Arc<dyn OutboxStore>>,
    sink: Option<Arc<dyn DeliverySink>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    settings: OutboxSettings,
}

impl OutboxBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            sink: None,
            clock: None,
            ids: None,
            settings: OutboxSettings::default(),
        }
    }

    /// Settings and HTTP sink from the `[forward]` section. The store is still required.
    pub fn from_config(config: &ForwardConfig) -> Result<Self, OutboxError> {
        let mut builder = Self::new().settings(OutboxSettings::from(config));
        if let Some(sink) = HttpSink::from_config(config)? {
            builder = builder.sink(Arc::new(sink));
        }
        Ok(builder)
    }

    pub fn store(mut self, store: Arc<dyn OutboxStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn DeliverySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn settings(mut self, settings: OutboxSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Label for this outbox's log fields and status.
    ///
    /// The wire `instance` is set on the sink itself ([`crate::impls::SinkOptions::instance`]).
    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.settings.instance = Some(instance.into());
        self
    }

    pub fn batch_limit(mut self, batch_limit: usize) -> Self {
        self.settings.batch_limit = batch_limit;
        self
    }

    pub fn max_failures(mut self, max_failures: u32) -> Self {
        self.settings.max_failures = max_failures;
        self
    }

    /// At most `max_rate` delivery cycles per `time_period`.
    pub fn rate_limit(mut self, max_rate: f64, time_period: Duration) -> Self {
        self.settings.max_rate = max_rate;
        self.settings.time_period = time_period;
        self
    }

    pub fn on_success(mut self, policy: SuccessPolicy) -> Self {
        self.settings.on_success = policy;
        self
    }

    pub fn build(self) -> Result<Outbox, BuildError> {
        self.settings.validate()?;
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let settings = self.settings;

        let publisher = self.sink.map(|sink| {
            PublisherLoop::new(
                Arc::clone(&store),
                sink,
                BatchSelector::new(settings.batch_limit, settings.max_failures),
                settings.on_success,
                clock,
                Arc::clone(&ids),
            )
            .with_instance(settings.instance.clone())
        });
        let limiter = RateLimiter::new(settings.max_rate, settings.time_period);
        let scheduler = Scheduler::new(publisher, limiter);

        Ok(Outbox::new(store, ids, scheduler, settings))
    }
}

impl Default for OutboxBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! HTTP delivery sink.
//!
//! One POST per batch. The body shape follows [`EndpointMode`]; the sink's
//! `ignore: true` semantics make redelivery of an already-stored row harmless.

use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::{EndpointMode, ForwardConfig};
use crate::domain::{DeliveryError, DeliveryOutcome, OutboxError, QueuedEvent};
use crate::ports::DeliverySink;

/// Table the `create` endpoint writes into.
pub const SINK_TABLE: &str = "datasette_events";

/// One forwarded row.
#[derive(Debug, Serialize)]
struct WireRow<'a> {
    id: String,
    instance: Option<&'a str>,
    event: &'a str,
    created: String,
    actor_id: Option<&'a str>,
    database_name: Option<&'a str>,
    table_name: Option<&'a str>,
    properties: &'a Map<String, Value>,
}

impl<'a> WireRow<'a> {
    fn new(event: &'a QueuedEvent, instance: Option<&'a str>) -> Self {
        Self {
            id: event.id.to_canonical(),
            instance,
            event: &event.event_name,
            created: event.created_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            actor_id: event.actor_id.as_deref(),
            database_name: event.database_name.as_deref(),
            table_name: event.table_name.as_deref(),
            properties: &event.properties,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestBody<'a> {
    Create {
        table: &'static str,
        rows: Vec<WireRow<'a>>,
        ignore: bool,
        pk: &'static str,
    },
    Insert {
        rows: Vec<WireRow<'a>>,
        ignore: bool,
    },
}

/// Connection settings for [`HttpSink`].
#[derive(Debug, Clone)]
pub struct SinkOptions {
    pub token: Option<String>,
    /// Label sent as each row's `instance`. Empty means none.
    pub instance: Option<String>,
    pub mode: EndpointMode,
    pub timeout: Duration,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            token: None,
            instance: None,
            mode: EndpointMode::default(),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct HttpSink {
    client: Client,
    url: String,
    token: Option<String>,
    instance: Option<String>,
    mode: EndpointMode,
}

impl HttpSink {
    pub fn new(url: impl Into<String>, options: SinkOptions) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(options.timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            token: options.token.filter(|t| !t.is_empty()),
            instance: options.instance.filter(|i| !i.is_empty()),
            mode: options.mode,
        })
    }

    /// Build a sink from the `[forward]` section.
    ///
    /// Returns `Ok(None)` when no `api_url` is configured: delivery is then disabled.
    pub fn from_config(config: &ForwardConfig) -> Result<Option<Self>, OutboxError> {
        let Some(url) = config.sink_url() else {
            debug!("no api_url configured, delivery disabled");
            return Ok(None);
        };
        let options = SinkOptions {
            token: config.bearer_token().map(str::to_string),
            instance: config.instance.clone(),
            mode: config.mode,
            timeout: config.request_timeout(),
        };
        Ok(Some(Self::new(url, options)?))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn body<'a>(&'a self, batch: &'a [QueuedEvent]) -> RequestBody<'a> {
        let rows = batch
            .iter()
            .map(|event| WireRow::new(event, self.instance.as_deref()))
            .collect();
        match self.mode {
            EndpointMode::Create => RequestBody::Create {
                table: SINK_TABLE,
                rows,
                ignore: true,
                pk: "id",
            },
            EndpointMode::Insert => RequestBody::Insert { rows, ignore: true },
        }
    }
}

#[async_trait]
impl DeliverySink for HttpSink {
    async fn send(&self, batch: &[QueuedEvent]) -> DeliveryOutcome {
        let mut request = self.client.post(&self.url).json(&self.body(batch));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                DeliveryOutcome::from_status(status, body)
            }
            Err(e) if e.is_timeout() => {
                debug!(url = %self.url, "sink request timed out");
                DeliveryOutcome::Failure(DeliveryError::Timeout)
            }
            Err(e) => DeliveryOutcome::Failure(DeliveryError::Transport(e.to_string())),
        }
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

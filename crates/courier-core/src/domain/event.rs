//! Event model: what the event source hands in, and what the outbox stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::EventId;

/// Property keys promoted out of `properties` into dedicated columns.
pub const DATABASE_KEY: &str = "database";
pub const TABLE_KEY: &str = "table";

/// A domain event as reported by the event source, before it gets an id.
///
/// `database_name`/`table_name` may be given explicitly or left inside
/// `properties` under the `database`/`table` keys; [`NewEvent::into_queued`]
/// resolves both into the dedicated columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl NewEvent {
    pub fn new(event_name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            event_name: event_name.into(),
            created_at,
            actor_id: None,
            database_name: None,
            table_name: None,
            properties: Map::new(),
        }
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn database(mut self, name: impl Into<String>) -> Self {
        self.database_name = Some(name.into());
        self
    }

    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table_name = Some(name.into());
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn properties(mut self, properties: Map<String, Value>) -> Self {
        self.properties.extend(properties);
        self
    }

    /// Assign an id and promote `database`/`table` properties.
    ///
    /// Both keys are always removed from `properties`. An explicit
    /// `database_name`/`table_name` wins over the property value, and empty
    /// strings count as absent.
    pub fn into_queued(self, id: EventId) -> QueuedEvent {
        let mut properties = self.properties;
        let database_from_props = properties.remove(DATABASE_KEY).and_then(value_as_name);
        let table_from_props = properties.remove(TABLE_KEY).and_then(value_as_name);

        QueuedEvent {
            id,
            event_name: self.event_name,
            created_at: self.created_at,
            actor_id: self.actor_id.filter(|s| !s.is_empty()),
            database_name: self
                .database_name
                .filter(|s| !s.is_empty())
                .or(database_from_props),
            table_name: self.table_name.filter(|s| !s.is_empty()).or(table_from_props),
            properties,
            failure_count: 0,
        }
    }
}

fn value_as_name(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// One row of the outbox: a domain event awaiting delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
    pub id: EventId,
    pub event_name: String,
    pub created_at: DateTime<Utc>,
    pub actor_id: Option<String>,
    pub database_name: Option<String>,
    pub table_name: Option<String>,
    pub properties: Map<String, Value>,
    pub failure_count: u32,
}

impl QueuedEvent {
    /// Would one more failure push this record past the ceiling?
    pub fn abandons_after_next_failure(&self, max_failures: u32) -> bool {
        self.failure_count.saturating_add(1) >= max_failures
    }
}

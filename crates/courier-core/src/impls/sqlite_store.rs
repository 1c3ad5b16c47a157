//! SQLite-backed outbox store.
//!
//! All statements run on tokio-rusqlite's single background thread, so writes
//! are serialized without SQLITE_BUSY juggling. Multi-row mutations run inside
//! one transaction each.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{ErrorCode, params};
use serde_json::{Map, Value};
use tokio_rusqlite::Connection;
use tracing::{debug, warn};

use crate::domain::{EventId, QueuedEvent, StoreError};
use crate::ports::{OutboxCounts, OutboxStore};

const TABLE: &str = "events_to_forward";

const CREATE_TABLE_SQL: &str = "
CREATE TABLE IF NOT EXISTS events_to_forward (
    id TEXT PRIMARY KEY,
    event TEXT NOT NULL,
    created TEXT NOT NULL,
    actor_id TEXT,
    database_name TEXT,
    table_name TEXT,
    properties TEXT NOT NULL DEFAULT '{}',
    failure_count INTEGER NOT NULL DEFAULT 0,
    sent_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_events_to_forward_pending
    ON events_to_forward (failure_count, id);
";

const SELECT_COLUMNS: &str =
    "rowid, id, event, created, actor_id, database_name, table_name, properties, failure_count";

/// A text column read without trusting its storage class.
type TextColumn = Result<Option<String>, String>;

fn text_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<TextColumn> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => Ok(None),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|s| Some(s.to_string()))
            .map_err(|e| e.to_string()),
        other => Err(format!("expected text, found {:?}", other.data_type())),
    })
}

fn required(column: TextColumn, name: &str) -> Result<String, String> {
    column
        .map_err(|e| format!("bad {name}: {e}"))?
        .ok_or_else(|| format!("missing {name}"))
}

fn optional(column: TextColumn, name: &str) -> Result<Option<String>, String> {
    column.map_err(|e| format!("bad {name}: {e}"))
}

/// Row as it sits in SQLite, before decoding.
///
/// Reading never fails on content, so one bad row cannot abort a whole query.
struct RawRow {
    rowid: i64,
    id: TextColumn,
    event: TextColumn,
    created: TextColumn,
    actor_id: TextColumn,
    database_name: TextColumn,
    table_name: TextColumn,
    properties: TextColumn,
    failure_count: Result<i64, String>,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let failure_count = match row.get_ref(8)? {
            ValueRef::Integer(n) => Ok(n),
            other => Err(format!("expected integer, found {:?}", other.data_type())),
        };
        Ok(Self {
            rowid: row.get(0)?,
            id: text_column(row, 1)?,
            event: text_column(row, 2)?,
            created: text_column(row, 3)?,
            actor_id: text_column(row, 4)?,
            database_name: text_column(row, 5)?,
            table_name: text_column(row, 6)?,
            properties: text_column(row, 7)?,
            failure_count,
        })
    }

    fn decode(self) -> Result<QueuedEvent, StoreError> {
        let label = match &self.id {
            Ok(Some(id)) => id.clone(),
            _ => format!("rowid {}", self.rowid),
        };
        let corrupt = |reason: String| StoreError::corrupt(label.clone(), reason);

        let id: EventId = required(self.id, "id")
            .and_then(|raw| raw.parse::<EventId>().map_err(|e| format!("bad id: {e}")))
            .map_err(&corrupt)?;
        let event_name = required(self.event, "event").map_err(&corrupt)?;
        let created_at = required(self.created, "created")
            .and_then(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map_err(|e| format!("bad created timestamp: {e}"))
            })
            .map_err(&corrupt)?
            .with_timezone(&Utc);
        let properties: Map<String, Value> = required(self.properties, "properties")
            .and_then(|raw| {
                serde_json::from_str(&raw).map_err(|e| format!("bad properties: {e}"))
            })
            .map_err(&corrupt)?;
        let failure_count = self
            .failure_count
            .and_then(|n| u32::try_from(n).map_err(|e| e.to_string()))
            .map_err(|e| corrupt(format!("bad failure_count: {e}")))?;

        Ok(QueuedEvent {
            id,
            event_name,
            created_at,
            actor_id: optional(self.actor_id, "actor_id").map_err(&corrupt)?,
            database_name: optional(self.database_name, "database_name").map_err(&corrupt)?,
            table_name: optional(self.table_name, "table_name").map_err(&corrupt)?,
            properties,
            failure_count,
        })
    }
}

/// Decoded rows, plus the rowids of rows that could not be decoded.
fn decode_rows(rows: Vec<RawRow>) -> (Vec<QueuedEvent>, Vec<i64>) {
    let mut events = Vec::with_capacity(rows.len());
    let mut undecodable = Vec::new();
    for row in rows {
        let rowid = row.rowid;
        match row.decode() {
            Ok(event) => events.push(event),
            Err(e) => {
                warn!(rowid, error = %e, "skipping undecodable outbox row");
                undecodable.push(rowid);
            }
        }
    }
    (events, undecodable)
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn canonical_ids(ids: &[EventId]) -> Vec<String> {
    ids.iter().map(EventId::to_canonical).collect()
}

/// SQLite outbox store.
///
/// Cloning shares the same connection.
#[derive(Clone)]
pub struct SqliteOutboxStore {
    conn: Arc<Connection>,
}

impl SqliteOutboxStore {
    /// Open (or create) a database file and enable WAL.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).await.map_err(StoreError::unavailable)?;
        conn.call(|conn| -> rusqlite::Result<()> {
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
        })
        .await
        .map_err(StoreError::unavailable)?;
        debug!(path = %path.display(), "opened sqlite outbox store");
        Ok(Self::from_connection(Arc::new(conn)))
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(StoreError::unavailable)?;
        Ok(Self::from_connection(Arc::new(conn)))
    }

    /// Share a connection the host application already owns.
    pub fn from_connection(conn: Arc<Connection>) -> Self {
        Self { conn }
    }

    /// Does the outbox table exist yet?
    pub async fn table_exists(&self) -> Result<bool, StoreError> {
        self.conn
            .call(|conn| -> rusqlite::Result<bool> {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    params![TABLE],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(StoreError::unavailable)
    }

    async fn query_events(
        &self,
        sql: String,
        max_failures: u32,
        limit: usize,
    ) -> Result<(Vec<QueuedEvent>, Vec<i64>), StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .conn
            .call(move |conn| -> rusqlite::Result<Vec<RawRow>> {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![max_failures, limit], RawRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(StoreError::unavailable)?;
        Ok(decode_rows(rows))
    }

    /// Push undecodable rows to the failure ceiling so selection stops returning them.
    async fn quarantine(&self, rowids: Vec<i64>, max_failures: u32) -> Result<(), StoreError> {
        let count = rowids.len();
        self.conn
            .call(move |conn| -> rusqlite::Result<()> {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx
                        .prepare("UPDATE events_to_forward SET failure_count = ?2 WHERE rowid = ?1")?;
                    for rowid in &rowids {
                        stmt.execute(params![rowid, max_failures])?;
                    }
                }
                tx.commit()
            })
            .await
            .map_err(StoreError::unavailable)?;
        warn!(count, "quarantined undecodable outbox rows as abandoned");
        Ok(())
    }

    /// Run `sql` (with the id as `?1`, plus optional extra params) once per id in one transaction.
    async fn update_each(
        &self,
        sql: &'static str,
        ids: &[EventId],
        stamp: Option<String>,
    ) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids = canonical_ids(ids);
        self.conn
            .call(move |conn| -> rusqlite::Result<u64> {
                let tx = conn.transaction()?;
                let mut affected = 0;
                {
                    let mut stmt = tx.prepare(sql)?;
                    for id in &ids {
                        let changed = match &stamp {
                            Some(stamp) => stmt.execute(params![id, stamp])?,
                            None => stmt.execute(params![id])?,
                        };
                        affected += changed as u64;
                    }
                }
                tx.commit()?;
                Ok(affected)
            })
            .await
            .map_err(StoreError::unavailable)
    }
}

#[async_trait]
impl OutboxStore for SqliteOutboxStore {
    async fn bootstrap(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| -> rusqlite::Result<()> { conn.execute_batch(CREATE_TABLE_SQL) })
            .await
            .map_err(StoreError::unavailable)
    }

    async fn insert(&self, event: QueuedEvent) -> Result<EventId, StoreError> {
        let id = event.id;
        let id_text = id.to_canonical();
        let properties = serde_json::to_string(&event.properties)
            .map_err(|e| StoreError::corrupt(&id_text, format!("unserializable properties: {e}")))?;
        let created = timestamp(event.created_at);
        let failure_count = i64::from(event.failure_count);
        let row_id = id_text.clone();

        let inserted = self
            .conn
            .call(move |conn| -> rusqlite::Result<bool> {
                let result = conn.execute(
                    "INSERT INTO events_to_forward \
                     (id, event, created, actor_id, database_name, table_name, properties, failure_count) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        row_id,
                        event.event_name,
                        created,
                        event.actor_id,
                        event.database_name,
                        event.table_name,
                        properties,
                        failure_count,
                    ],
                );
                match result {
                    Ok(_) => Ok(true),
                    Err(rusqlite::Error::SqliteFailure(err, _))
                        if err.code == ErrorCode::ConstraintViolation =>
                    {
                        Ok(false)
                    }
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(StoreError::unavailable)?;

        if inserted {
            Ok(id)
        } else {
            Err(StoreError::DuplicateId(id_text))
        }
    }

    async fn select_batch(
        &self,
        max_failures: u32,
        limit: usize,
    ) -> Result<Vec<QueuedEvent>, StoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM {TABLE} \
             WHERE sent_at IS NULL AND failure_count < ?1 \
             ORDER BY id LIMIT ?2"
        );
        // each pass quarantines at least one row, so this terminates
        loop {
            let (events, undecodable) = self.query_events(sql.clone(), max_failures, limit).await?;
            if undecodable.is_empty() {
                return Ok(events);
            }
            self.quarantine(undecodable, max_failures).await?;
        }
    }

    async fn delete_by_ids(&self, ids: &[EventId]) -> Result<u64, StoreError> {
        self.update_each("DELETE FROM events_to_forward WHERE id = ?1", ids, None)
            .await
    }

    async fn increment_failures(&self, ids: &[EventId]) -> Result<u64, StoreError> {
        self.update_each(
            "UPDATE events_to_forward SET failure_count = failure_count + 1 WHERE id = ?1",
            ids,
            None,
        )
        .await
    }

    async fn mark_sent(&self, ids: &[EventId], at: DateTime<Utc>) -> Result<u64, StoreError> {
        self.update_each(
            "UPDATE events_to_forward SET sent_at = ?2 WHERE id = ?1",
            ids,
            Some(timestamp(at)),
        )
        .await
    }

    async fn counts(&self, max_failures: u32) -> Result<OutboxCounts, StoreError> {
        let (pending, abandoned, sent) = self
            .conn
            .call(move |conn| -> rusqlite::Result<(i64, i64, i64)> {
                conn.query_row(
                    "SELECT \
                       COALESCE(SUM(CASE WHEN sent_at IS NULL AND failure_count < ?1 THEN 1 ELSE 0 END), 0), \
                       COALESCE(SUM(CASE WHEN sent_at IS NULL AND failure_count >= ?1 THEN 1 ELSE 0 END), 0), \
                       COALESCE(SUM(CASE WHEN sent_at IS NOT NULL THEN 1 ELSE 0 END), 0) \
                     FROM events_to_forward",
                    params![max_failures],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
            })
            .await
            .map_err(StoreError::unavailable)?;

        Ok(OutboxCounts {
            pending: pending.max(0) as u64,
            abandoned: abandoned.max(0) as u64,
            sent: sent.max(0) as u64,
        })
    }

    async fn list_abandoned(
        &self,
        max_failures: u32,
        limit: usize,
    ) -> Result<Vec<QueuedEvent>, StoreError> {
        let (events, _undecodable) = self
            .query_events(
                format!(
                    "SELECT {SELECT_COLUMNS} FROM {TABLE} \
                     WHERE sent_at IS NULL AND failure_count >= ?1 \
                     ORDER BY id LIMIT ?2"
                ),
                max_failures,
                limit,
            )
            .await?;
        Ok(events)
    }

    async fn purge_abandoned(&self, max_failures: u32) -> Result<u64, StoreError> {
        self.conn
            .call(move |conn| -> rusqlite::Result<u64> {
                let removed = conn.execute(
                    "DELETE FROM events_to_forward WHERE sent_at IS NULL AND failure_count >= ?1",
                    params![max_failures],
                )?;
                Ok(removed as u64)
            })
            .await
            .map_err(StoreError::unavailable)
    }
}

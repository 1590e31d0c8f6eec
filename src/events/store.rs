//! C1 — the durable, append-only per-message event log.
//!
//! `allocate_seq` and `append` are deliberately separate calls: splitting
//! allocation from append makes the id-normalization step (which embeds
//! `seq` into `id`) race-free, and preserves I1 even under concurrent
//! emitters for the same `message_id`.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{CoreError, CoreResult};
use crate::events::{Event, EventPayload, PartialEvent, SCHEMA_VERSION};

/// Append outcome for [`EventStore::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Ok,
    Conflict,
}

pub trait EventStore: Send + Sync {
    /// Atomically increments and returns the per-message sequence counter
    /// (upsert semantics, post-increment return). Serializable across
    /// concurrent callers for the same `message_id`.
    fn allocate_seq(&self, message_id: &str) -> CoreResult<u64>;

    /// Inserts a fully-stamped event. `seq` MUST already have been
    /// allocated via `allocate_seq`. Returns `Conflict` rather than an
    /// error if (`message_id`, `seq`) already exists — this is an expected
    /// outcome under retry, not a fault.
    fn append(&self, event: &Event) -> CoreResult<AppendOutcome>;

    /// Events with `seq > since_seq`, ascending, at most `limit`.
    fn read_since(&self, message_id: &str, since_seq: u64, limit: usize) -> CoreResult<Vec<Event>>;

    /// All events for a message, ascending.
    fn read_all(&self, message_id: &str) -> CoreResult<Vec<Event>>;

    /// Highest persisted `seq` for a message, or 0 if none exist.
    fn max_seq(&self, message_id: &str) -> CoreResult<u64>;

    /// Deletes events older than `ttl` seconds. A `ttl` of 0 disables
    /// pruning entirely (the default, per `MESSAGE_EVENTS_TTL_S`).
    fn prune_expired(&self, ttl_s: u64) -> CoreResult<usize>;
}

/// SQLite-backed implementation. A single connection guarded by a mutex —
/// mutations are short critical sections, and SQLite's own WAL mode lets
/// readers proceed concurrently with the writer holding the lock only for
/// the statement execution itself.
pub struct SqliteEventStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventStore {
    pub fn open(db_path: &Path) -> CoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CoreError::Config(format!("failed to create db directory: {e}"))
                })?;
            }
        }
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> CoreResult<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA mmap_size = 8388608;
             PRAGMA cache_size = -2000;
             PRAGMA temp_store = MEMORY;
             PRAGMA busy_timeout = 5000;",
        )?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> CoreResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS message_counters (
                message_id TEXT PRIMARY KEY,
                next_seq   INTEGER NOT NULL DEFAULT 0
             );

             CREATE TABLE IF NOT EXISTS events (
                message_id TEXT NOT NULL,
                seq        INTEGER NOT NULL,
                id         TEXT NOT NULL,
                ts         TEXT NOT NULL,
                v          INTEGER NOT NULL,
                type       TEXT NOT NULL,
                payload    TEXT NOT NULL,
                chat_id    TEXT,
                PRIMARY KEY (message_id, seq)
             );
             CREATE UNIQUE INDEX IF NOT EXISTS idx_events_message_id_id
                ON events(message_id, id);
             CREATE INDEX IF NOT EXISTS idx_events_ts ON events(ts);",
        )?;
        Ok(())
    }

    fn row_to_event(
        message_id: String,
        seq: u64,
        id: String,
        ts: String,
        v: u32,
        payload_json: String,
        chat_id: Option<String>,
    ) -> CoreResult<Event> {
        let payload: EventPayload = serde_json::from_str(&payload_json)
            .map_err(|e| CoreError::Config(format!("corrupt event payload: {e}")))?;
        let ts = chrono::DateTime::parse_from_rfc3339(&ts)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| CoreError::Config(format!("corrupt event timestamp: {e}")))?;
        Ok(Event {
            v,
            payload,
            id,
            ts,
            message_id,
            chat_id,
            seq,
        })
    }
}

impl EventStore for SqliteEventStore {
    fn allocate_seq(&self, message_id: &str) -> CoreResult<u64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO message_counters (message_id, next_seq) VALUES (?1, 1)
             ON CONFLICT(message_id) DO UPDATE SET next_seq = next_seq + 1",
            params![message_id],
        )?;
        let seq: i64 = conn.query_row(
            "SELECT next_seq FROM message_counters WHERE message_id = ?1",
            params![message_id],
            |row| row.get(0),
        )?;
        Ok(seq as u64)
    }

    fn append(&self, event: &Event) -> CoreResult<AppendOutcome> {
        let conn = self.conn.lock();
        let payload_json = serde_json::to_string(&event.payload)
            .map_err(|e| CoreError::Config(format!("failed to encode event payload: {e}")))?;
        let result = conn.execute(
            "INSERT INTO events (message_id, seq, id, ts, v, type, payload, chat_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.message_id,
                event.seq as i64,
                event.id,
                event.ts.to_rfc3339(),
                event.v,
                event.type_name(),
                payload_json,
                event.chat_id,
            ],
        );
        match result {
            Ok(_) => Ok(AppendOutcome::Ok),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(AppendOutcome::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_since(&self, message_id: &str, since_seq: u64, limit: usize) -> CoreResult<Vec<Event>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT message_id, seq, id, ts, v, payload, chat_id
             FROM events WHERE message_id = ?1 AND seq > ?2
             ORDER BY seq ASC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![message_id, since_seq as i64, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, u32>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;
        let mut events = Vec::new();
        for row in rows {
            let (message_id, seq, id, ts, v, payload_json, chat_id) = row?;
            events.push(Self::row_to_event(message_id, seq as u64, id, ts, v, payload_json, chat_id)?);
        }
        Ok(events)
    }

    fn read_all(&self, message_id: &str) -> CoreResult<Vec<Event>> {
        self.read_since(message_id, 0, usize::MAX)
    }

    fn max_seq(&self, message_id: &str) -> CoreResult<u64> {
        let conn = self.conn.lock();
        let seq: Option<i64> = conn
            .query_row(
                "SELECT MAX(seq) FROM events WHERE message_id = ?1",
                params![message_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(seq.unwrap_or(0) as u64)
    }

    fn prune_expired(&self, ttl_s: u64) -> CoreResult<usize> {
        if ttl_s == 0 {
            return Ok(0);
        }
        let cutoff = Utc::now() - chrono::Duration::seconds(ttl_s as i64);
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM events WHERE ts < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EndStatus;

    fn sample_event(message_id: &str, seq: u64, payload: EventPayload) -> Event {
        Event {
            v: SCHEMA_VERSION,
            payload,
            id: crate::events::format_event_id(1_700_000_000_000 + seq as i64, seq),
            ts: Utc::now(),
            message_id: message_id.to_string(),
            chat_id: Some("chat-1".to_string()),
            seq,
        }
    }

    #[test]
    fn allocate_seq_is_monotonic_per_message() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        assert_eq!(store.allocate_seq("m1").unwrap(), 1);
        assert_eq!(store.allocate_seq("m1").unwrap(), 2);
        assert_eq!(store.allocate_seq("m1").unwrap(), 3);
        // independent per message_id
        assert_eq!(store.allocate_seq("m2").unwrap(), 1);
    }

    #[test]
    fn append_then_read_back_in_order() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        for seq in 1..=3u64 {
            store.allocate_seq("m1").unwrap();
            let event = sample_event("m1", seq, EventPayload::Content { md: format!("chunk-{seq}") });
            assert_eq!(store.append(&event).unwrap(), AppendOutcome::Ok);
        }
        let events = store.read_all("m1").unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].seq, 1);
        assert_eq!(events[2].seq, 3);
    }

    #[test]
    fn duplicate_seq_is_a_conflict_not_an_error() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        store.allocate_seq("m1").unwrap();
        let event = sample_event("m1", 1, EventPayload::start());
        assert_eq!(store.append(&event).unwrap(), AppendOutcome::Ok);
        let dup = sample_event("m1", 1, EventPayload::start());
        assert_eq!(store.append(&dup).unwrap(), AppendOutcome::Conflict);
    }

    #[test]
    fn read_since_only_returns_newer_events() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        for seq in 1..=5u64 {
            store.allocate_seq("m1").unwrap();
            store
                .append(&sample_event("m1", seq, EventPayload::Content { md: "x".into() }))
                .unwrap();
        }
        let events = store.read_since("m1", 3, 10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].seq, 4);
        assert_eq!(events[1].seq, 5);
    }

    #[test]
    fn max_seq_reflects_highest_persisted() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        assert_eq!(store.max_seq("unknown").unwrap(), 0);
        store.allocate_seq("m1").unwrap();
        store
            .append(&sample_event("m1", 1, EventPayload::start()))
            .unwrap();
        store.allocate_seq("m1").unwrap();
        store
            .append(&sample_event("m1", 2, EventPayload::end(EndStatus::Completed, 5, 0)))
            .unwrap();
        assert_eq!(store.max_seq("m1").unwrap(), 2);
    }

    #[test]
    fn prune_expired_is_a_noop_when_ttl_is_zero() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        store.allocate_seq("m1").unwrap();
        store
            .append(&sample_event("m1", 1, EventPayload::start()))
            .unwrap();
        assert_eq!(store.prune_expired(0).unwrap(), 0);
        assert_eq!(store.read_all("m1").unwrap().len(), 1);
    }
}

//! SQLite persistence for the session ledger.
//!
//! Two tables: `sessions`, one mutable row per session, and `activity_events`,
//! an append-only audit log that duration accounting never reads.

use activetime_protocol::{ActivityEvent, SessionId, SessionLog, StartParams};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, TransactionBehavior};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{storage, LedgerError};
use crate::session::{format_timestamp, parse_timestamp, SessionRow, SessionStatus};

const SESSION_COLUMNS: &str = "id, user_id, task_id, app_name, context_name, context_path, \
     status, start_time, end_time, last_heartbeat, paused_duration, duration";

pub struct Db {
    path: PathBuf,
}

impl Db {
    pub fn new(path: PathBuf) -> Result<Self, LedgerError> {
        let db = Self { path };
        db.init_schema()?;
        Ok(db)
    }

    #[cfg(test)]
    pub fn get_session(&self, session_id: SessionId) -> Result<Option<SessionRow>, LedgerError> {
        self.with_connection(|conn| load_session(conn, session_id))
    }

    pub fn list_finalized_sessions(
        &self,
        user_id: i64,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<SessionLog>, LedgerError> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, user_id, task_id, app_name, context_name, context_path, \
                            start_time, end_time, COALESCE(duration, 0), paused_duration \
                     FROM sessions \
                     WHERE user_id = ?1 AND status = 'stopped' \
                       AND start_time >= ?2 AND start_time < ?3 \
                     ORDER BY start_time ASC, id ASC",
                )
                .map_err(storage("Failed to prepare logs query"))?;

            let rows = stmt
                .query_map(
                    params![user_id, format_timestamp(from), format_timestamp(until)],
                    |row| {
                        Ok(SessionLog {
                            id: row.get(0)?,
                            user_id: row.get(1)?,
                            task_id: row.get(2)?,
                            app_name: row.get(3)?,
                            context_name: row.get(4)?,
                            context_path: row.get(5)?,
                            start_time: row.get(6)?,
                            end_time: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                            duration: row.get(8)?,
                            paused_duration: row.get(9)?,
                        })
                    },
                )
                .map_err(storage("Failed to query logs"))?;

            let mut logs = Vec::new();
            for row in rows {
                logs.push(row.map_err(storage("Failed to decode log row"))?);
            }
            Ok(logs)
        })
    }

    pub fn list_activity_events(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<ActivityEvent>, LedgerError> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT session_id, timestamp, event_type, event_data \
                     FROM activity_events WHERE session_id = ?1 \
                     ORDER BY timestamp ASC, id ASC",
                )
                .map_err(storage("Failed to prepare activity events query"))?;

            let rows = stmt
                .query_map(params![session_id], |row| {
                    let raw: Option<String> = row.get(3)?;
                    Ok(ActivityEvent {
                        session_id: row.get(0)?,
                        timestamp: row.get(1)?,
                        event_type: row.get(2)?,
                        event_data: raw.map(decode_event_data),
                    })
                })
                .map_err(storage("Failed to query activity events"))?;

            let mut events = Vec::new();
            for row in rows {
                events.push(row.map_err(storage("Failed to decode activity event row"))?);
            }
            Ok(events)
        })
    }

    pub fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    /// Runs `op` inside `BEGIN IMMEDIATE`, so the write lock is taken before
    /// any read. Commits only when `op` succeeds.
    pub fn with_write_transaction<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(storage("Failed to begin write transaction"))?;
            let value = op(&tx)?;
            tx.commit()
                .map_err(storage("Failed to commit write transaction"))?;
            Ok(value)
        })
    }

    fn init_schema(&self) -> Result<(), LedgerError> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS sessions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    task_id INTEGER,
                    app_name TEXT NOT NULL,
                    context_name TEXT NOT NULL,
                    context_path TEXT NOT NULL,
                    start_time TEXT NOT NULL,
                    end_time TEXT,
                    last_heartbeat TEXT NOT NULL,
                    paused_duration REAL NOT NULL DEFAULT 0,
                    duration REAL,
                    status TEXT NOT NULL DEFAULT 'active'
                 );
                 CREATE INDEX IF NOT EXISTS idx_sessions_user_start
                    ON sessions (user_id, start_time);
                 CREATE TABLE IF NOT EXISTS activity_events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id INTEGER NOT NULL,
                    timestamp TEXT NOT NULL,
                    event_type TEXT NOT NULL,
                    event_data TEXT
                 );
                 CREATE INDEX IF NOT EXISTS idx_activity_events_session
                    ON activity_events (session_id, timestamp);
                 COMMIT;",
            )
            .map_err(storage("Failed to initialize schema"))
        })
    }

    fn open(&self) -> Result<Connection, LedgerError> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent).map_err(|err| {
                LedgerError::Storage(format!("Failed to create ledger data dir: {}", err))
            })?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(storage("Failed to open sqlite db"))?;

        conn.busy_timeout(Duration::from_millis(5000))
            .map_err(storage("Failed to set busy_timeout"))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(storage("Failed to enable WAL"))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(storage("Failed to set synchronous"))?;

        Ok(conn)
    }
}

pub fn insert_session(
    conn: &Connection,
    start: &StartParams,
    now: DateTime<Utc>,
) -> Result<SessionId, LedgerError> {
    let now = format_timestamp(now);
    conn.execute(
        "INSERT INTO sessions \
            (user_id, task_id, app_name, context_name, context_path, \
             start_time, last_heartbeat, paused_duration, status) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, 0, ?7)",
        params![
            start.user_id,
            start.task_id,
            start.app_name,
            start.context_name,
            start.context_path,
            now,
            SessionStatus::Active.as_str()
        ],
    )
    .map_err(storage("Failed to insert session"))?;
    Ok(conn.last_insert_rowid())
}

pub fn load_session(
    conn: &Connection,
    session_id: SessionId,
) -> Result<Option<SessionRow>, LedgerError> {
    let sql = format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS);
    conn.query_row(&sql, params![session_id], session_from_row)
        .optional()
        .map_err(storage("Failed to query session"))
}

/// Writes back every mutable column. `start_time` and identity stay as inserted.
pub fn save_session(conn: &Connection, row: &SessionRow) -> Result<(), LedgerError> {
    let updated = conn
        .execute(
            "UPDATE sessions SET \
                status = ?2, \
                end_time = ?3, \
                last_heartbeat = ?4, \
                paused_duration = ?5, \
                duration = ?6 \
             WHERE id = ?1",
            params![
                row.id,
                row.status.as_str(),
                row.end_time.map(format_timestamp),
                format_timestamp(row.last_heartbeat),
                row.paused_duration,
                row.duration
            ],
        )
        .map_err(storage("Failed to update session"))?;
    if updated == 0 {
        return Err(LedgerError::NotFound(row.id));
    }
    Ok(())
}

pub fn insert_activity_event(
    conn: &Connection,
    session_id: SessionId,
    timestamp: DateTime<Utc>,
    event_type: &str,
    event_data: Option<&Value>,
) -> Result<(), LedgerError> {
    let data = event_data.map(Value::to_string);
    conn.execute(
        "INSERT INTO activity_events (session_id, timestamp, event_type, event_data) \
         VALUES (?1, ?2, ?3, ?4)",
        params![session_id, format_timestamp(timestamp), event_type, data],
    )
    .map_err(storage("Failed to insert activity event"))?;
    Ok(())
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    let status_raw: String = row.get(6)?;
    let status = SessionStatus::from_str(&status_raw)
        .ok_or_else(|| invalid_column(6, format!("Unknown session status: {}", status_raw)))?;

    Ok(SessionRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        task_id: row.get(2)?,
        app_name: row.get(3)?,
        context_name: row.get(4)?,
        context_path: row.get(5)?,
        status,
        start_time: timestamp_column(row, 7)?,
        end_time: match row.get::<_, Option<String>>(8)? {
            Some(raw) => Some(parse_column(8, &raw)?),
            None => None,
        },
        last_heartbeat: timestamp_column(row, 9)?,
        paused_duration: row.get(10)?,
        duration: row.get(11)?,
    })
}

fn timestamp_column(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(index)?;
    parse_column(index, &raw)
}

fn parse_column(index: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    parse_timestamp(raw).ok_or_else(|| invalid_column(index, format!("Invalid timestamp: {}", raw)))
}

fn invalid_column(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn decode_event_data(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

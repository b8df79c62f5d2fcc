//! Authoritative session ledger.
//!
//! Every mutating operation is a single read-modify-write inside one
//! `BEGIN IMMEDIATE` transaction, which serializes concurrent calls for the
//! same session across connections and threads. Conflicting writers are
//! resolved first-writer-wins: the later caller observes the committed state.

use activetime_protocol::{ActivityEvent, RecordEventParams, SessionId, SessionLog, StartParams};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tracing::{debug, info};

use crate::db::{self, Db};
use crate::error::LedgerError;
use crate::session::{Outcome, SessionRow};

pub struct Ledger {
    db: Db,
}

impl Ledger {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn start(&self, params: &StartParams, now: DateTime<Utc>) -> Result<SessionId, LedgerError> {
        let session_id = self
            .db
            .with_write_transaction(|conn| db::insert_session(conn, params, now))?;
        info!(
            session_id,
            user_id = params.user_id,
            task_id = ?params.task_id,
            app_name = %params.app_name,
            context_path = %params.context_path,
            "Session started"
        );
        Ok(session_id)
    }

    /// Never fails for state reasons: unknown, paused and stopped sessions are
    /// acknowledged without change.
    pub fn heartbeat(&self, session_id: SessionId, now: DateTime<Utc>) -> Result<Outcome, LedgerError> {
        let outcome = self
            .mutate(session_id, |row| Ok(row.heartbeat(now)))?
            .unwrap_or(Outcome::NoOp);
        debug!(session_id, outcome = ?outcome, "Heartbeat");
        Ok(outcome)
    }

    pub fn pause(&self, session_id: SessionId, now: DateTime<Utc>) -> Result<Outcome, LedgerError> {
        let outcome = self
            .mutate(session_id, |row| Ok(row.pause(now)))?
            .unwrap_or(Outcome::NoOp);
        match outcome {
            Outcome::Applied => info!(session_id, "Session paused"),
            Outcome::NoOp => debug!(session_id, "Pause ignored"),
        }
        Ok(outcome)
    }

    pub fn resume(&self, session_id: SessionId, now: DateTime<Utc>) -> Result<(), LedgerError> {
        let (delta, total) = self
            .mutate(session_id, |row| {
                let delta = row.resume(now)?;
                Ok((delta, row.paused_duration))
            })?
            .ok_or(LedgerError::NotFound(session_id))?;
        info!(
            session_id,
            paused_minutes = delta,
            paused_total = total,
            "Session resumed"
        );
        Ok(())
    }

    pub fn stop(&self, session_id: SessionId, now: DateTime<Utc>) -> Result<Outcome, LedgerError> {
        let (outcome, duration) = self
            .mutate(session_id, |row| {
                let outcome = row.stop(now);
                Ok((outcome, row.duration))
            })?
            .ok_or(LedgerError::NotFound(session_id))?;
        match outcome {
            Outcome::Applied => info!(session_id, duration = ?duration, "Session stopped"),
            Outcome::NoOp => debug!(session_id, "Stop ignored; session already stopped"),
        }
        Ok(outcome)
    }

    #[cfg(test)]
    pub fn session(&self, session_id: SessionId) -> Result<Option<SessionRow>, LedgerError> {
        self.db.get_session(session_id)
    }

    /// Finalized sessions for one user whose start falls on `day` (UTC).
    pub fn logs(&self, user_id: i64, day: NaiveDate) -> Result<Vec<SessionLog>, LedgerError> {
        let from = day_start(day)?;
        let until = day
            .succ_opt()
            .ok_or_else(|| LedgerError::Validation(format!("date out of range: {}", day)))
            .and_then(day_start)?;
        self.db.list_finalized_sessions(user_id, from, until)
    }

    pub fn session_events(&self, session_id: SessionId) -> Result<Vec<ActivityEvent>, LedgerError> {
        self.db.list_activity_events(session_id)
    }

    /// Appends to the audit log. Has no effect on accounting.
    pub fn record_event(
        &self,
        params: &RecordEventParams,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.db.with_write_transaction(|conn| {
            if db::load_session(conn, params.session_id)?.is_none() {
                return Err(LedgerError::NotFound(params.session_id));
            }
            db::insert_activity_event(
                conn,
                params.session_id,
                now,
                &params.event_type,
                params.event_data.as_ref(),
            )
        })?;
        debug!(
            session_id = params.session_id,
            event_type = %params.event_type,
            "Activity event recorded"
        );
        Ok(())
    }

    /// Loads, transforms and persists one row atomically. Returns `None` for an
    /// unknown session. Unchanged rows are not rewritten; a failing `op` rolls
    /// the transaction back.
    fn mutate<T>(
        &self,
        session_id: SessionId,
        op: impl FnOnce(&mut SessionRow) -> Result<T, LedgerError>,
    ) -> Result<Option<T>, LedgerError> {
        self.db.with_write_transaction(|conn| {
            let mut row = match db::load_session(conn, session_id)? {
                Some(row) => row,
                None => return Ok(None),
            };
            let before = row.clone();
            let value = op(&mut row)?;
            if row != before {
                db::save_session(conn, &row)?;
            }
            Ok(Some(value))
        })
    }
}

fn day_start(day: NaiveDate) -> Result<DateTime<Utc>, LedgerError> {
    day.and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| LedgerError::Validation(format!("date out of range: {}", day)))
}

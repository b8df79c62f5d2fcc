//! Session state machine and duration accounting.
//!
//! All transitions operate on an in-memory `SessionRow` loaded inside a write
//! transaction; the caller persists the row afterwards. Durations are minutes.
//!
//! `last_heartbeat` is dual-purpose: while Active it is the last liveness
//! signal, while Paused it is the pause start read by the next resume.

use activetime_protocol::SessionId;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;

use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Paused,
    Stopped,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Stopped => "stopped",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "active" => Some(SessionStatus::Active),
            "paused" => Some(SessionStatus::Paused),
            "stopped" => Some(SessionStatus::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a transition changed the row or was absorbed as a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    NoOp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRow {
    pub id: SessionId,
    pub user_id: i64,
    pub task_id: Option<i64>,
    pub app_name: String,
    pub context_name: String,
    pub context_path: String,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_heartbeat: DateTime<Utc>,
    pub paused_duration: f64,
    pub duration: Option<f64>,
}

impl SessionRow {
    /// When the current pause began, if the session is paused.
    pub fn paused_at(&self) -> Option<DateTime<Utc>> {
        (self.status == SessionStatus::Paused).then_some(self.last_heartbeat)
    }

    pub fn heartbeat(&mut self, now: DateTime<Utc>) -> Outcome {
        if self.status != SessionStatus::Active {
            return Outcome::NoOp;
        }
        if now <= self.last_heartbeat {
            return Outcome::NoOp;
        }
        self.last_heartbeat = now;
        Outcome::Applied
    }

    /// Marks the pause start. A repeated pause moves the marker forward, so
    /// redundant pause signals collapse into the latest one.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Outcome {
        match self.status {
            SessionStatus::Stopped => Outcome::NoOp,
            SessionStatus::Active | SessionStatus::Paused => {
                self.status = SessionStatus::Paused;
                self.last_heartbeat = now;
                Outcome::Applied
            }
        }
    }

    /// Credits the interval since the pause marker and returns it in minutes.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<f64, LedgerError> {
        let paused_at = self.paused_at().ok_or(LedgerError::InvalidTransition {
            session_id: self.id,
            status: self.status,
        })?;
        let delta = pause_delta_minutes(paused_at, now);
        self.paused_duration += delta;
        self.status = SessionStatus::Active;
        self.last_heartbeat = now;
        Ok(delta)
    }

    pub fn stop(&mut self, now: DateTime<Utc>) -> Outcome {
        if self.status == SessionStatus::Stopped {
            return Outcome::NoOp;
        }
        self.end_time = Some(now);
        self.duration = Some(active_minutes(
            self.start_time,
            now,
            self.paused_duration,
        ));
        self.status = SessionStatus::Stopped;
        Outcome::Applied
    }
}

pub fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 60_000.0
}

/// Pause intervals never count negatively, even if the clock stepped back.
pub fn pause_delta_minutes(paused_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    minutes_between(paused_at, now).max(0.0)
}

/// `max(0, (end - start) - paused)` rounded to two decimals.
pub fn active_minutes(start: DateTime<Utc>, end: DateTime<Utc>, paused_minutes: f64) -> f64 {
    let rounded = round2(minutes_between(start, end) - paused_minutes);
    if rounded > 0.0 {
        rounded
    } else {
        0.0
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Fixed-width UTC text so lexical order matches time order in SQLite.
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 30, 9, 0, 0).single().expect("base time")
            + Duration::minutes(minute)
    }

    fn row() -> SessionRow {
        SessionRow {
            id: 1,
            user_id: 7,
            task_id: None,
            app_name: "maya".to_string(),
            context_name: "shot_010.ma".to_string(),
            context_path: "/projects/shot_010.ma".to_string(),
            status: SessionStatus::Active,
            start_time: at(0),
            end_time: None,
            last_heartbeat: at(0),
            paused_duration: 0.0,
            duration: None,
        }
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            SessionStatus::Active,
            SessionStatus::Paused,
            SessionStatus::Stopped,
        ] {
            assert_eq!(SessionStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::from_str("idle"), None);
    }

    #[test]
    fn heartbeat_never_moves_backwards() {
        let mut session = row();
        assert_eq!(session.heartbeat(at(5)), Outcome::Applied);
        assert_eq!(session.heartbeat(at(3)), Outcome::NoOp);
        assert_eq!(session.heartbeat(at(5)), Outcome::NoOp);
        assert_eq!(session.last_heartbeat, at(5));
        assert_eq!(session.status, SessionStatus::Active);
    }

    #[test]
    fn heartbeat_is_noop_unless_active() {
        let mut session = row();
        session.pause(at(2));
        assert_eq!(session.heartbeat(at(3)), Outcome::NoOp);
        assert_eq!(session.last_heartbeat, at(2));
    }

    #[test]
    fn repeated_pause_advances_marker() {
        let mut session = row();
        session.pause(at(12));
        session.pause(at(15));
        assert_eq!(session.paused_at(), Some(at(15)));

        let delta = session.resume(at(20)).expect("resume");
        assert_eq!(delta, 5.0);
        assert_eq!(session.paused_duration, 5.0);
    }

    #[test]
    fn resume_requires_paused() {
        let mut session = row();
        let before = session.clone();
        let err = session.resume(at(4)).expect_err("not paused");
        assert!(matches!(
            err,
            LedgerError::InvalidTransition {
                status: SessionStatus::Active,
                ..
            }
        ));
        assert_eq!(session, before);
    }

    #[test]
    fn resume_ignores_backwards_clock() {
        let mut session = row();
        session.pause(at(10));
        session.resume(at(9)).expect("resume");
        assert_eq!(session.paused_duration, 0.0);
    }

    #[test]
    fn stop_is_final() {
        let mut session = row();
        assert_eq!(session.stop(at(30)), Outcome::Applied);
        assert_eq!(session.duration, Some(30.0));
        assert_eq!(session.stop(at(45)), Outcome::NoOp);
        assert_eq!(session.end_time, Some(at(30)));
        assert_eq!(session.duration, Some(30.0));
        assert_eq!(session.pause(at(46)), Outcome::NoOp);
    }

    #[test]
    fn stop_while_paused_does_not_credit_open_pause() {
        let mut session = row();
        session.pause(at(10));
        session.stop(at(20));
        assert_eq!(session.duration, Some(20.0));
    }

    #[test]
    fn active_minutes_clamps_and_rounds() {
        assert_eq!(active_minutes(at(0), at(0), 0.0), 0.0);
        assert_eq!(active_minutes(at(0), at(5), 9.0), 0.0);
        assert!(active_minutes(at(0), at(0), 0.001).is_sign_positive());

        let end = at(0) + Duration::seconds(100);
        assert_eq!(active_minutes(at(0), end, 0.0), 1.67);
    }

    #[test]
    fn timestamps_are_fixed_width_utc() {
        let formatted = format_timestamp(at(0));
        assert_eq!(formatted, "2026-01-30T09:00:00.000000Z");
        assert_eq!(parse_timestamp(&formatted), Some(at(0)));
    }
}

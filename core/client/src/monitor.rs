//! Local idle detection.
//!
//! The monitor only sees signals observed on this machine and never asks the
//! ledger whether the user is idle. `believed_paused` mirrors what the client
//! last told the ledger and may drift from the server's view.

use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ActivityMonitor {
    last_active_at: DateTime<Utc>,
    believed_paused: bool,
    idle_timeout: Duration,
}

impl ActivityMonitor {
    pub fn new(idle_timeout: Duration, now: DateTime<Utc>) -> Self {
        Self {
            last_active_at: now,
            believed_paused: false,
            idle_timeout,
        }
    }

    /// Records an activity signal. Returns `true` when the session is
    /// believed paused, meaning a resume must be sent before any heartbeat.
    pub fn record_activity(&mut self, now: DateTime<Utc>) -> bool {
        self.last_active_at = now;
        self.believed_paused
    }

    /// Idle when not already paused and strictly more than `idle_timeout`
    /// has elapsed since the last activity.
    pub fn is_idle(&self, now: DateTime<Utc>) -> bool {
        if self.believed_paused {
            return false;
        }
        match (now - self.last_active_at).to_std() {
            Ok(elapsed) => elapsed > self.idle_timeout,
            Err(_) => false,
        }
    }

    pub fn mark_paused(&mut self) {
        self.believed_paused = true;
    }

    pub fn mark_resumed(&mut self) {
        self.believed_paused = false;
    }

    /// Fresh state for a newly started session.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.last_active_at = now;
        self.believed_paused = false;
    }

    pub fn believed_paused(&self) -> bool {
        self.believed_paused
    }

    pub fn last_active_at(&self) -> DateTime<Utc> {
        self.last_active_at
    }
}

//! Completed-phase records.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::pomodoro::phase::TimerPhase;

/// One completed Work or Break phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    /// Calendar day the phase finished on, `YYYY-MM-DD` (UTC).
    pub date: String,
    #[serde(rename = "type")]
    pub kind: TimerPhase,
    /// Configured full length of the phase, in seconds.
    pub duration: u32,
    #[serde(default)]
    pub task_id: Option<String>,
}

/// Append-only history of completed phases, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionLog {
    sessions: Vec<Session>,
}

impl SessionLog {
    pub fn from_sessions(sessions: Vec<Session>) -> Self {
        Self { sessions }
    }

    pub fn push(&mut self, session: Session) {
        self.sessions.push(session);
    }

    pub fn as_slice(&self) -> &[Session] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Total Work seconds recorded on `date`.
    pub fn focus_seconds_on(&self, date: &str) -> u64 {
        self.sessions
            .iter()
            .filter(|s| s.kind == TimerPhase::Work && s.date == date)
            .map(|s| u64::from(s.duration))
            .sum()
    }

    pub fn completed_work_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|s| s.kind == TimerPhase::Work)
            .count()
    }
}

pub fn today() -> String {
    date_key(Utc::now().date_naive())
}

pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Time-derived identifiers (epoch milliseconds), strictly increasing
/// within one generator even when called twice in the same millisecond.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: i64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps later ids above one created elsewhere (another process sharing
    /// the store). Non-numeric ids are ignored.
    pub fn observe(&mut self, id: &str) {
        if let Ok(n) = id.parse::<i64>() {
            self.last = self.last.max(n);
        }
    }

    pub fn next_id(&mut self) -> String {
        let now = Utc::now().timestamp_millis();
        self.last = if now > self.last { now } else { self.last + 1 };
        self.last.to_string()
    }
}

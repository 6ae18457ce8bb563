use serde::{Deserialize, Serialize};

use super::phase::TimerPhase;

pub const DEFAULT_WORK_MINUTES: u32 = 25;
pub const DEFAULT_BREAK_MINUTES: u32 = 5;
pub const WORK_MINUTES_RANGE: (u32, u32) = (1, 60);
pub const BREAK_MINUTES_RANGE: (u32, u32) = (1, 30);

/// Work and break lengths in whole minutes, always within their ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimerSettings {
    work_minutes: u32,
    break_minutes: u32,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            work_minutes: DEFAULT_WORK_MINUTES,
            break_minutes: DEFAULT_BREAK_MINUTES,
        }
    }
}

impl TimerSettings {
    pub fn new(work_minutes: u32, break_minutes: u32) -> Self {
        Self {
            work_minutes: clamp_work(work_minutes),
            break_minutes: clamp_break(break_minutes),
        }
    }

    pub fn work_minutes(&self) -> u32 {
        self.work_minutes
    }

    pub fn break_minutes(&self) -> u32 {
        self.break_minutes
    }

    pub fn set_work_minutes(&mut self, minutes: u32) {
        self.work_minutes = clamp_work(minutes);
    }

    pub fn set_break_minutes(&mut self, minutes: u32) {
        self.break_minutes = clamp_break(minutes);
    }

    /// Full length of `phase` in seconds.
    pub fn duration_for(&self, phase: TimerPhase) -> u32 {
        match phase {
            TimerPhase::Work => self.work_minutes * 60,
            TimerPhase::Break => self.break_minutes * 60,
        }
    }

    /// Re-applies the ranges to values that bypassed the setters, e.g. a
    /// hand-edited settings file.
    pub fn normalized(self) -> Self {
        Self::new(self.work_minutes, self.break_minutes)
    }
}

fn clamp_work(minutes: u32) -> u32 {
    minutes.clamp(WORK_MINUTES_RANGE.0, WORK_MINUTES_RANGE.1)
}

fn clamp_break(minutes: u32) -> u32 {
    minutes.clamp(BREAK_MINUTES_RANGE.0, BREAK_MINUTES_RANGE.1)
}

/// Parses free-form minute input the way a numeric field would.
///
/// Text that is not a number falls back to the lower bound; numbers outside
/// `range` (including negatives and fractions) are clamped to it.
pub fn parse_minutes(input: &str, range: (u32, u32)) -> u32 {
    match input.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => {
            let rounded = value.trunc();
            if rounded <= range.0 as f64 {
                range.0
            } else if rounded >= range.1 as f64 {
                range.1
            } else {
                rounded as u32
            }
        }
        _ => range.0,
    }
}

use serde::{Deserialize, Serialize};

/// The two alternating timer modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerPhase {
    #[default]
    Work,
    Break,
}

impl TimerPhase {
    pub fn next(self) -> Self {
        match self {
            TimerPhase::Work => TimerPhase::Break,
            TimerPhase::Break => TimerPhase::Work,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimerPhase::Work => "WORK",
            TimerPhase::Break => "BREAK",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimerPhase::Work => "Focus Time",
            TimerPhase::Break => "Break Time",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            TimerPhase::Work => "💼",
            TimerPhase::Break => "☕",
        }
    }

    /// Notification title and body announcing the end of this phase.
    pub fn completion_message(&self) -> (&'static str, &'static str) {
        match self {
            TimerPhase::Work => ("Pomodoro Complete!", "Time for a break!"),
            TimerPhase::Break => ("Break Over!", "Time to focus now."),
        }
    }
}

impl std::fmt::Display for TimerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

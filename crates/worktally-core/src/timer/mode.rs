use serde::{Deserialize, Serialize};

use super::settings::TimerSettings;

/// The three timer phases. `Work` is the initial state; the cycle never ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum TimerMode {
    #[default]
    Work,
    ShortBreak,
    LongBreak,
}

impl TimerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TimerMode::Work => "work",
            TimerMode::ShortBreak => "shortBreak",
            TimerMode::LongBreak => "longBreak",
        }
    }

    /// Duration of this mode in seconds under `settings`.
    pub fn duration_secs(self, settings: &TimerSettings) -> u64 {
        settings.minutes_for(self).saturating_mul(60)
    }
}

impl std::fmt::Display for TimerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TimerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "work" => Ok(TimerMode::Work),
            "shortBreak" | "short_break" | "short-break" => Ok(TimerMode::ShortBreak),
            "longBreak" | "long_break" | "long-break" => Ok(TimerMode::LongBreak),
            other => Err(format!("unknown timer mode: {other}")),
        }
    }
}

/// Outcome of leaving a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: TimerMode,
    pub sessions_completed_in_cycle: u32,
    /// Whether the next mode starts running on its own.
    pub auto_start: bool,
}

/// Compute the mode that follows `current`.
///
/// Leaving `Work` bumps the cycle counter; every `long_break_interval`-th
/// completion earns a long break. Leaving any break returns to `Work`.
pub fn next_transition(
    current: TimerMode,
    sessions_completed_in_cycle: u32,
    settings: &TimerSettings,
) -> Transition {
    match current {
        TimerMode::Work => {
            let completed = sessions_completed_in_cycle.saturating_add(1);
            let interval = settings.long_break_interval.max(1);
            let next = if completed % interval == 0 {
                TimerMode::LongBreak
            } else {
                TimerMode::ShortBreak
            };
            Transition {
                next,
                sessions_completed_in_cycle: completed,
                auto_start: settings.auto_start_breaks,
            }
        }
        TimerMode::ShortBreak | TimerMode::LongBreak => Transition {
            next: TimerMode::Work,
            sessions_completed_in_cycle,
            auto_start: settings.auto_start_pomodoros,
        },
    }
}

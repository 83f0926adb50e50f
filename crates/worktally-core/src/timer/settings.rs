use serde::{Deserialize, Serialize};

use super::mode::TimerMode;
use crate::error::ValidationError;

/// Per-mode durations and auto-start policy, as supplied by the settings
/// provider. Serialized under `[timer]` in `config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSettings {
    /// Work duration in minutes.
    #[serde(default = "default_work")]
    pub work: u64,
    #[serde(default = "default_short_break")]
    pub short_break: u64,
    #[serde(default = "default_long_break")]
    pub long_break: u64,
    #[serde(default)]
    pub auto_start_breaks: bool,
    #[serde(default)]
    pub auto_start_pomodoros: bool,
    /// Every n-th completed work session is followed by a long break.
    #[serde(default = "default_long_break_interval")]
    pub long_break_interval: u32,
}

fn default_work() -> u64 {
    25
}
fn default_short_break() -> u64 {
    5
}
fn default_long_break() -> u64 {
    15
}
fn default_long_break_interval() -> u32 {
    4
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            work: default_work(),
            short_break: default_short_break(),
            long_break: default_long_break(),
            auto_start_breaks: false,
            auto_start_pomodoros: false,
            long_break_interval: default_long_break_interval(),
        }
    }
}

impl TimerSettings {
    pub fn minutes_for(&self, mode: TimerMode) -> u64 {
        match mode {
            TimerMode::Work => self.work,
            TimerMode::ShortBreak => self.short_break,
            TimerMode::LongBreak => self.long_break,
        }
    }

    /// Reject settings the state machine cannot run on.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, minutes) in [
            ("work", self.work),
            ("short_break", self.short_break),
            ("long_break", self.long_break),
        ] {
            if minutes == 0 {
                return Err(ValidationError::InvalidValue {
                    field: field.into(),
                    message: "duration must be at least one minute".into(),
                });
            }
        }
        if self.long_break_interval == 0 {
            return Err(ValidationError::InvalidValue {
                field: "long_break_interval".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

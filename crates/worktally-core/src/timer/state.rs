//! Timer state and its persisted snapshot form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::mode::TimerMode;
use super::settings::TimerSettings;
use crate::session::SessionStatus;
use crate::task::TaskInfo;

/// The in-flight unit of work. Mirrors one durable `WorkSession` row while
/// it is being accumulated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
    /// Assigned by the session store, never generated locally.
    pub session_id: String,
    pub task_id: String,
    pub start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    pub status: SessionStatus,
}

/// Singleton timer state. Only engine operations mutate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub mode: TimerMode,
    pub remaining_seconds: u64,
    pub total_seconds: u64,
    pub is_running: bool,
    /// Incremented only when leaving `Work`.
    pub sessions_completed_in_cycle: u32,
    #[serde(default)]
    pub current_task_id: Option<String>,
    #[serde(default)]
    pub active_session: Option<ActiveSession>,
    /// `remaining_seconds` at the moment `active_session` was created.
    #[serde(default)]
    pub session_start_timer_position: Option<u64>,
    /// Last whole-minute bucket already credited; `None` before the first
    /// tick of a run.
    #[serde(default)]
    pub last_counted_minute: Option<u64>,
    /// Never persisted: every restored device starts out active.
    #[serde(skip, default = "default_active_device")]
    pub is_active_device: bool,
    #[serde(default)]
    pub settings: TimerSettings,
}

fn default_active_device() -> bool {
    true
}

impl TimerState {
    pub fn new(settings: TimerSettings) -> Self {
        let total = TimerMode::Work.duration_secs(&settings);
        Self {
            mode: TimerMode::Work,
            remaining_seconds: total,
            total_seconds: total,
            is_running: false,
            sessions_completed_in_cycle: 0,
            current_task_id: None,
            active_session: None,
            session_start_timer_position: None,
            last_counted_minute: None,
            is_active_device: true,
            settings,
        }
    }

    pub fn active_session_id(&self) -> Option<&str> {
        self.active_session.as_ref().map(|s| s.session_id.as_str())
    }

    /// Whole-minute bucket the countdown currently sits in.
    pub fn current_minute(&self) -> u64 {
        self.remaining_seconds / 60
    }

    /// Load the full duration of `mode` into the countdown.
    pub(crate) fn load_mode(&mut self, mode: TimerMode) {
        self.mode = mode;
        self.total_seconds = mode.duration_secs(&self.settings);
        self.remaining_seconds = self.total_seconds;
    }
}

impl Default for TimerState {
    fn default() -> Self {
        Self::new(TimerSettings::default())
    }
}

/// What both persistence tiers store: the timer state plus a denormalized
/// copy of the current task so a reload has something to render before the
/// task list is available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub state: TimerState,
    #[serde(default)]
    pub task: Option<TaskInfo>,
    /// Account the state belongs to; `None` before anyone signed in.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Device that wrote this snapshot.
    pub device_id: String,
    pub saved_at: DateTime<Utc>,
}

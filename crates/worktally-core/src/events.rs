use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::SessionStatus;
use crate::timer::TimerMode;

/// Where a restored timer state came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreSource {
    Local,
    Remote,
    /// Pushed by the host from another device.
    External,
}

/// Every state change in the engine produces an Event.
/// Operations return the events they caused; subscribers receive them too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    TimerStarted {
        mode: TimerMode,
        remaining_secs: u64,
        task_id: Option<String>,
        at: DateTime<Utc>,
    },
    TimerPaused {
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    TimerReset {
        mode: TimerMode,
        at: DateTime<Utc>,
    },
    Ticked {
        remaining_secs: u64,
    },
    ModeChanged {
        from: TimerMode,
        to: TimerMode,
        sessions_completed_in_cycle: u32,
        running: bool,
        at: DateTime<Utc>,
    },
    MinuteCredited {
        session_id: String,
        task_id: String,
        minutes: u64,
        at: DateTime<Utc>,
    },
    SessionStarted {
        session_id: String,
        task_id: String,
        mode: TimerMode,
        at: DateTime<Utc>,
    },
    /// A session was adopted as-is during reconciliation.
    SessionResumed {
        session_id: String,
        task_id: String,
        at: DateTime<Utc>,
    },
    SessionFinalized {
        session_id: String,
        status: SessionStatus,
        flushed_minutes: u64,
        at: DateTime<Utc>,
    },
    TaskChanged {
        from: Option<String>,
        to: Option<String>,
        at: DateTime<Utc>,
    },
    SettingsChanged {
        at: DateTime<Utc>,
    },
    StateRestored {
        source: RestoreSource,
        at: DateTime<Utc>,
    },
    DeviceActivityChanged {
        active: bool,
        at: DateTime<Utc>,
    },
    OrphansCleaned {
        closed: usize,
        at: DateTime<Utc>,
    },
    TornDown {
        at: DateTime<Utc>,
    },
}

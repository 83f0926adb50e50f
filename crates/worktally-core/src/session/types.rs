use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timer::TimerMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Switched,
    Completed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Switched => "switched",
            SessionStatus::Completed => "completed",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "paused" => Ok(SessionStatus::Paused),
            "switched" => Ok(SessionStatus::Switched),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// Durable record of time worked on one task during one continuous run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkSession {
    pub id: String,
    pub user_id: String,
    pub task_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    /// Accumulated whole minutes.
    pub duration: u64,
    pub session_type: TimerMode,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Fields for `SessionStore::create_session`. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWorkSession {
    pub user_id: String,
    pub task_id: String,
    pub project_id: Option<String>,
    pub session_type: TimerMode,
    pub start_time: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Partial update. Duration is deliberately absent: it only ever moves
/// through `increment_duration`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub end_time: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl SessionPatch {
    pub fn finalize(status: SessionStatus, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(status),
            end_time: Some(at),
            notes: None,
        }
    }
}

//! Work-session lifecycle: create, credit, switch, complete, sweep.
//!
//! Store failures never interrupt the countdown. They are logged and the
//! in-memory state moves on; a session that could not be created simply
//! leaves `active_session` empty.

use chrono::Utc;
use tracing::{debug, info, warn};

use super::engine::SessionEngine;
use crate::events::Event;
use crate::session::{NewWorkSession, SessionPatch, SessionStatus};
use crate::timer::ActiveSession;

impl SessionEngine {
    /// Durable writes need an account and the arbitration flag.
    pub(super) fn can_write_remote(&self) -> bool {
        self.state.is_active_device && self.user_id.is_some()
    }

    pub(super) fn create_active_session(&mut self) {
        let Some(task_id) = self.state.current_task_id.clone() else {
            return;
        };
        if !self.state.is_active_device {
            debug!(task_id = %task_id, "inactive device, not opening a session");
            return;
        }
        let Some(user_id) = self.user_id.clone() else {
            debug!(task_id = %task_id, "no user, not opening a session");
            return;
        };

        let now = Utc::now();
        let project_id = self
            .task
            .as_ref()
            .filter(|t| t.id == task_id)
            .and_then(|t| t.project_id.clone());
        let fields = NewWorkSession {
            user_id,
            task_id: task_id.clone(),
            project_id,
            session_type: self.state.mode,
            start_time: now,
            notes: None,
        };

        match self.sessions.create_session(fields) {
            Ok(session_id) => {
                info!(session_id = %session_id, task_id = %task_id, mode = %self.state.mode, "session started");
                self.state.active_session = Some(ActiveSession {
                    session_id: session_id.clone(),
                    task_id: task_id.clone(),
                    start_time: now,
                    last_update_time: now,
                    status: SessionStatus::Active,
                });
                self.state.session_start_timer_position = Some(self.state.remaining_seconds);
                self.state.last_counted_minute = None;
                self.record(Event::SessionStarted {
                    session_id,
                    task_id,
                    mode: self.state.mode,
                    at: now,
                });
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "failed to create session, timer continues without one");
                self.state.active_session = None;
            }
        }
    }

    /// Credit `minutes` to the active session and its task.
    pub(super) fn update_active_session(&mut self, minutes: u64) {
        if !self.can_write_remote() {
            return;
        }
        let Some(active) = self.state.active_session.as_ref() else {
            return;
        };
        let session_id = active.session_id.clone();
        let task_id = active.task_id.clone();
        if self.credit(&session_id, &task_id, minutes) {
            if let Some(active) = self.state.active_session.as_mut() {
                active.last_update_time = Utc::now();
            }
        }
    }

    /// Atomic increment on the session, then the task counter. The two are
    /// independent; a failure in one does not undo the other.
    fn credit(&mut self, session_id: &str, task_id: &str, minutes: u64) -> bool {
        let credited = match self.sessions.increment_duration(session_id, minutes) {
            Ok(()) => true,
            Err(e) => {
                warn!(session_id, minutes, error = %e, "failed to credit session");
                false
            }
        };
        if let Err(e) = self.tasks.credit_time(task_id, minutes) {
            warn!(task_id, minutes, error = %e, "failed to credit task");
        }
        if credited {
            debug!(session_id, minutes, "minutes credited");
            self.record(Event::MinuteCredited {
                session_id: session_id.to_string(),
                task_id: task_id.to_string(),
                minutes,
                at: Utc::now(),
            });
        }
        credited
    }

    /// Close the active session as `switched` without touching its duration.
    pub(super) fn switch_active_session(&mut self) {
        let Some(active) = self.state.active_session.take() else {
            return;
        };
        self.state.last_counted_minute = None;
        self.state.session_start_timer_position = None;
        if !self.can_write_remote() {
            return;
        }

        let now = Utc::now();
        match self
            .sessions
            .update_session(&active.session_id, SessionPatch::finalize(SessionStatus::Switched, now))
        {
            Ok(()) => {
                info!(session_id = %active.session_id, "session switched");
                self.record(Event::SessionFinalized {
                    session_id: active.session_id,
                    status: SessionStatus::Switched,
                    flushed_minutes: 0,
                    at: now,
                });
            }
            Err(e) => warn!(session_id = %active.session_id, error = %e, "failed to switch session"),
        }
    }

    /// Flush the partially elapsed minute, then finalize with `status`.
    pub(super) fn complete_active_session(&mut self, status: SessionStatus) {
        let Some(active) = self.state.active_session.take() else {
            return;
        };
        let flushed = self
            .state
            .last_counted_minute
            .map(|last| last.saturating_sub(self.state.current_minute()))
            .unwrap_or(0);
        self.state.last_counted_minute = None;
        self.state.session_start_timer_position = None;
        if !self.can_write_remote() {
            return;
        }

        if flushed > 0 {
            self.credit(&active.session_id, &active.task_id, flushed);
        }

        let now = Utc::now();
        match self
            .sessions
            .update_session(&active.session_id, SessionPatch::finalize(status, now))
        {
            Ok(()) => {
                info!(session_id = %active.session_id, status = status.as_str(), flushed, "session finalized");
                self.record(Event::SessionFinalized {
                    session_id: active.session_id,
                    status,
                    flushed_minutes: flushed,
                    at: now,
                });
            }
            Err(e) => warn!(session_id = %active.session_id, error = %e, "failed to finalize session"),
        }
    }

    /// Close every other active session this user left behind.
    pub fn cleanup_orphaned_sessions(&mut self) -> Vec<Event> {
        self.sweep_orphans();
        self.finish()
    }

    pub(super) fn sweep_orphans(&mut self) {
        if !self.can_write_remote() {
            return;
        }
        let Some(user_id) = self.user_id.clone() else {
            return;
        };
        let keep = self.state.active_session_id().map(str::to_string);
        match self.sessions.cleanup_orphaned_sessions(&user_id, keep.as_deref()) {
            Ok(0) => {}
            Ok(closed) => {
                info!(user_id = %user_id, closed, "closed orphaned sessions");
                self.record(Event::OrphansCleaned {
                    closed,
                    at: Utc::now(),
                });
            }
            Err(e) => warn!(user_id = %user_id, error = %e, "orphan cleanup failed"),
        }
    }
}

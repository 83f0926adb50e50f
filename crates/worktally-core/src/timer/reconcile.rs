//! Two-tier persistence and startup reconciliation.
//!
//! The local tier is written on every tick and read first on startup. The
//! remote tier (the session store's snapshot slot) is written at minute
//! boundaries and on every state-changing command, and read at most once
//! per `remote_read_window_secs`.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::engine::{AuthState, Lifecycle, SessionEngine};
use super::state::{TimerSnapshot, TimerState};
use crate::events::{Event, RestoreSource};
use crate::session::SessionStatus;
use crate::task::find_task_with_retry;

/// Local key holding the serialized [`TimerSnapshot`].
pub const TIMER_STATE_KEY: &str = "timer_state";
/// Local key holding the RFC 3339 time of the last remote read.
pub const LAST_REMOTE_SYNC_KEY: &str = "last_remote_sync";

impl SessionEngine {
    fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            state: self.state.clone(),
            task: self.task.clone(),
            user_id: self.user_id.clone(),
            device_id: self.options.device_id.clone(),
            saved_at: Utc::now(),
        }
    }

    pub(super) fn save_local(&self) {
        let blob = match serde_json::to_string(&self.snapshot()) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(error = %e, "failed to serialize timer snapshot");
                return;
            }
        };
        if let Err(e) = self.snapshots.set(TIMER_STATE_KEY, &blob) {
            warn!(error = %e, "failed to write local timer snapshot");
        }
    }

    pub(super) fn save_remote(&self) {
        if !self.can_write_remote() {
            return;
        }
        let Some(user_id) = self.user_id.as_deref() else {
            return;
        };
        if let Err(e) = self.sessions.save_timer_snapshot(user_id, &self.snapshot()) {
            warn!(user_id, error = %e, "failed to write remote timer snapshot");
        }
    }

    pub(super) fn persist_all(&self) {
        self.save_local();
        self.save_remote();
    }

    /// Take over a snapshot's state, keeping this device's arbitration flag
    /// and the settings the engine was configured with.
    fn adopt(&mut self, snapshot: TimerSnapshot) {
        let active = self.state.is_active_device;
        let settings = self.state.settings.clone();
        let stale_settings = snapshot.state.settings != settings;

        self.state = snapshot.state;
        self.state.is_active_device = active;
        self.state.settings = settings;
        if stale_settings && !self.state.is_running {
            self.state.load_mode(self.state.mode);
        }
        if snapshot.task.is_some() {
            self.task = snapshot.task;
        }
    }

    /// Restore, reconcile and sweep for `user_id`.
    ///
    /// 0. When another user was signed in, drop their state first.
    /// 1. Adopt the local snapshot; a corrupted one, or one written for a
    ///    different user, is discarded.
    /// 2. Adopt the remote snapshot when the last read is older than the
    ///    read window and the remote one is at least as new as the local one.
    /// 3. Verify a remembered running session, replacing it when stale.
    /// 4. Resolve the current task's display fields, with retry.
    /// 5. Close orphaned sessions other than the active one.
    pub fn initialize_persistence(&mut self, user_id: impl Into<String>) -> Vec<Event> {
        let user_id = user_id.into();
        info!(user_id = %user_id, "initializing timer persistence");
        if let Some(previous) = self.user_id.clone().filter(|prev| *prev != user_id) {
            info!(previous = %previous, user_id = %user_id, "user changed, dropping previous timer state");
            self.clear_local();
        }
        self.lifecycle = Lifecycle::Initializing;
        self.user_id = Some(user_id);

        let local_saved_at = self.restore_local();
        if self.remote_read_due() {
            self.restore_remote(local_saved_at);
        } else {
            debug!("remote snapshot read within window, skipping");
        }

        let replaced = self.resume_active_session();
        self.resolve_current_task();
        self.sweep_orphans();

        self.lifecycle = Lifecycle::Ready;
        self.save_local();
        if replaced {
            self.save_remote();
        }
        self.finish()
    }

    fn restore_local(&mut self) -> Option<DateTime<Utc>> {
        let blob = self.snapshots.get(TIMER_STATE_KEY)?;
        match serde_json::from_str::<TimerSnapshot>(&blob) {
            Ok(snapshot) if !self.owns(&snapshot) => {
                info!(
                    owner = snapshot.user_id.as_deref().unwrap_or("none"),
                    "local snapshot belongs to another user, discarding"
                );
                self.clear_local();
                None
            }
            Ok(snapshot) => {
                let saved_at = snapshot.saved_at;
                self.adopt(snapshot);
                self.record(Event::StateRestored {
                    source: RestoreSource::Local,
                    at: Utc::now(),
                });
                Some(saved_at)
            }
            Err(e) => {
                warn!(error = %e, "local timer snapshot is corrupted, starting fresh");
                if let Err(e) = self.snapshots.remove(TIMER_STATE_KEY) {
                    warn!(error = %e, "failed to discard corrupted snapshot");
                }
                self.state = TimerState::new(self.state.settings.clone());
                self.task = None;
                None
            }
        }
    }

    /// Snapshots written before sign-in carry no user and are adoptable.
    fn owns(&self, snapshot: &TimerSnapshot) -> bool {
        match snapshot.user_id.as_deref() {
            Some(owner) => self.user_id.as_deref() == Some(owner),
            None => true,
        }
    }

    fn remote_read_due(&self) -> bool {
        let last = self
            .snapshots
            .get(LAST_REMOTE_SYNC_KEY)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
            .map(|t| t.with_timezone(&Utc));
        match last {
            None => true,
            Some(last) => {
                let window = i64::try_from(self.options.remote_read_window_secs).unwrap_or(i64::MAX);
                Utc::now().signed_duration_since(last).num_seconds() > window
            }
        }
    }

    fn restore_remote(&mut self, local_saved_at: Option<DateTime<Utc>>) {
        let Some(user_id) = self.user_id.clone() else {
            return;
        };
        match self.sessions.load_timer_snapshot(&user_id) {
            Ok(Some(snapshot)) => {
                if local_saved_at.is_some_and(|local| local > snapshot.saved_at) {
                    debug!("local snapshot is newer than remote, keeping local");
                } else {
                    info!(device_id = %snapshot.device_id, "adopting remote timer snapshot");
                    self.adopt(snapshot);
                    self.record(Event::StateRestored {
                        source: RestoreSource::Remote,
                        at: Utc::now(),
                    });
                }
                self.mark_remote_read();
            }
            Ok(None) => self.mark_remote_read(),
            Err(e) => warn!(user_id = %user_id, error = %e, "failed to read remote timer snapshot"),
        }
    }

    fn mark_remote_read(&self) {
        if let Err(e) = self
            .snapshots
            .set(LAST_REMOTE_SYNC_KEY, &Utc::now().to_rfc3339())
        {
            warn!(error = %e, "failed to record remote read time");
        }
    }

    /// Returns true when a replacement session was opened.
    fn resume_active_session(&mut self) -> bool {
        if !self.state.is_running {
            return false;
        }
        let Some(active) = self.state.active_session.clone() else {
            return false;
        };

        match self.sessions.get_session(&active.session_id) {
            Ok(Some(session)) if session.status == SessionStatus::Active => {
                info!(session_id = %active.session_id, "resuming active session");
                self.record(Event::SessionResumed {
                    session_id: active.session_id,
                    task_id: active.task_id,
                    at: Utc::now(),
                });
                false
            }
            Ok(found) => {
                info!(
                    session_id = %active.session_id,
                    status = found.as_ref().map(|s| s.status.as_str()).unwrap_or("missing"),
                    "remembered session is stale, opening a new one"
                );
                self.state.active_session = None;
                self.state.session_start_timer_position = None;
                self.state.last_counted_minute = None;
                self.create_active_session();
                self.state.active_session.is_some()
            }
            Err(e) => {
                warn!(session_id = %active.session_id, error = %e, "could not verify session, keeping it");
                false
            }
        }
    }

    fn resolve_current_task(&mut self) {
        let Some(task_id) = self.state.current_task_id.clone() else {
            return;
        };
        match find_task_with_retry(&*self.tasks, &task_id, &self.options.task_retry) {
            Some(task) => self.task = Some(task),
            None => warn!(task_id = %task_id, "task unresolved, keeping cached fields"),
        }
    }

    /// Remove both local keys and reset the in-memory timer.
    fn clear_local(&mut self) {
        for key in [TIMER_STATE_KEY, LAST_REMOTE_SYNC_KEY] {
            if let Err(e) = self.snapshots.remove(key) {
                warn!(key, error = %e, "failed to clear local key");
            }
        }
        self.state = TimerState::new(self.state.settings.clone());
        self.task = None;
    }

    /// Drop the user, both local keys and all in-memory state.
    pub fn teardown(&mut self) -> Vec<Event> {
        self.clear_local();
        self.user_id = None;
        self.lifecycle = Lifecycle::TornDown;
        info!("timer state torn down");
        self.record(Event::TornDown { at: Utc::now() });
        self.finish()
    }

    pub fn handle_auth(&mut self, auth: AuthState) -> Vec<Event> {
        match auth {
            AuthState::Authenticated(user_id) => {
                if self.lifecycle == Lifecycle::Ready && self.user_id.as_deref() == Some(user_id.as_str()) {
                    return self.finish();
                }
                self.initialize_persistence(user_id)
            }
            AuthState::Unauthenticated => self.teardown(),
        }
    }

    /// Adopt a snapshot pushed by the host. When it comes from another
    /// device whose timer is running, this device stops being the active
    /// one. Nothing locks the session: the last device to `start()` wins.
    pub fn apply_external_snapshot(&mut self, snapshot: TimerSnapshot) -> Vec<Event> {
        if !self.owns(&snapshot) {
            warn!(
                owner = snapshot.user_id.as_deref().unwrap_or("none"),
                "ignoring snapshot pushed for another user"
            );
            return self.finish();
        }
        let running_elsewhere =
            snapshot.device_id != self.options.device_id && snapshot.state.is_running;
        self.adopt(snapshot);
        self.record(Event::StateRestored {
            source: RestoreSource::External,
            at: Utc::now(),
        });
        if running_elsewhere && self.state.is_active_device {
            info!("another device is running the timer, standing by");
            self.state.is_active_device = false;
            self.record(Event::DeviceActivityChanged {
                active: false,
                at: Utc::now(),
            });
        }
        self.save_local();
        self.finish()
    }
}

//! Timer and work-session engine.
//!
//! The engine is a tick-driven state machine. It does not own a thread;
//! the host calls `tick()` once per second while the timer runs, and calls
//! the other operations in response to user actions.
//!
//! ## Mode cycle
//!
//! ```text
//! Work -> ShortBreak -> Work -> ... -> Work -> LongBreak -> Work
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let mut engine = SessionEngine::new(settings, store, snapshots, tasks, options);
//! engine.initialize_persistence("user-1");
//! engine.set_current_task(Some(task));
//! engine.start();
//! // Once per second:
//! engine.tick();
//! ```
//!
//! Every operation returns the events it produced; subscribers registered
//! with [`SessionEngine::subscribe`] receive the same events together with
//! the resulting [`TimerState`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::mode::{next_transition, TimerMode};
use super::settings::TimerSettings;
use super::state::TimerState;
use crate::error::ValidationError;
use crate::events::Event;
use crate::session::{SessionStatus, SessionStore};
use crate::storage::{Config, MissedMinutePolicy, SnapshotStore};
use crate::sync::new_device_id;
use crate::task::{RetryPolicy, TaskInfo, TaskLookup};

/// Knobs that are not part of the user-facing timer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Stamped on every snapshot this engine writes.
    pub device_id: String,
    /// Minimum age of the last remote read before startup reads again.
    pub remote_read_window_secs: u64,
    pub task_retry: RetryPolicy,
    pub missed_minutes: MissedMinutePolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            device_id: new_device_id(),
            remote_read_window_secs: 300,
            task_retry: RetryPolicy::default(),
            missed_minutes: MissedMinutePolicy::default(),
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &Config, device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            remote_read_window_secs: config.sync.remote_read_window_secs,
            task_retry: config.tasks.clone(),
            missed_minutes: config.accounting.missed_minutes,
        }
    }
}

/// Engine lifecycle, driven by the authentication signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Uninitialized,
    Initializing,
    Ready,
    TornDown,
}

/// Authentication transitions the host forwards to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Authenticated(String),
    Unauthenticated,
}

pub type SubscriptionId = u64;

type Listener = Box<dyn FnMut(&Event, &TimerState)>;

/// Owns the [`TimerState`] and everything that writes to the two
/// persistence tiers on its behalf.
pub struct SessionEngine {
    pub(super) state: TimerState,
    /// Display fields of the current task, cached for reloads.
    pub(super) task: Option<TaskInfo>,
    pub(super) user_id: Option<String>,
    pub(super) lifecycle: Lifecycle,
    pub(super) sessions: Box<dyn SessionStore>,
    pub(super) snapshots: Box<dyn SnapshotStore>,
    pub(super) tasks: Box<dyn TaskLookup>,
    pub(super) options: EngineOptions,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: SubscriptionId,
    pending: Vec<Event>,
}

impl SessionEngine {
    pub fn new(
        settings: TimerSettings,
        sessions: impl SessionStore + 'static,
        snapshots: impl SnapshotStore + 'static,
        tasks: impl TaskLookup + 'static,
        options: EngineOptions,
    ) -> Self {
        Self {
            state: TimerState::new(settings),
            task: None,
            user_id: None,
            lifecycle: Lifecycle::Uninitialized,
            sessions: Box::new(sessions),
            snapshots: Box::new(snapshots),
            tasks: Box::new(tasks),
            options,
            listeners: Vec::new(),
            next_subscription: 0,
            pending: Vec::new(),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> &TimerState {
        &self.state
    }

    pub fn current_task(&self) -> Option<&TaskInfo> {
        self.task.as_ref()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn device_id(&self) -> &str {
        &self.options.device_id
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe(
        &mut self,
        listener: impl FnMut(&Event, &TimerState) + 'static,
    ) -> SubscriptionId {
        self.next_subscription += 1;
        let id = self.next_subscription;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sid, _)| *sid != id);
        self.listeners.len() != before
    }

    pub(super) fn record(&mut self, event: Event) {
        self.pending.push(event);
    }

    /// Deliver everything recorded during the current operation.
    pub(super) fn finish(&mut self) -> Vec<Event> {
        let events = std::mem::take(&mut self.pending);
        for event in &events {
            for (_, listener) in self.listeners.iter_mut() {
                listener(event, &self.state);
            }
        }
        events
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Start (or resume) the countdown and claim the active device.
    pub fn start(&mut self) -> Vec<Event> {
        if !self.state.is_active_device {
            self.state.is_active_device = true;
            self.record(Event::DeviceActivityChanged {
                active: true,
                at: Utc::now(),
            });
        }

        if !self.state.is_running {
            if self.state.remaining_seconds == 0 {
                self.state.load_mode(self.state.mode);
            }
            self.state.is_running = true;
            self.record(Event::TimerStarted {
                mode: self.state.mode,
                remaining_secs: self.state.remaining_seconds,
                task_id: self.state.current_task_id.clone(),
                at: Utc::now(),
            });
        }
        // Also retries a create that failed while already running.
        if self.state.active_session.is_none() {
            self.create_active_session();
        }

        self.persist_all();
        self.finish()
    }

    pub fn pause(&mut self) -> Vec<Event> {
        if !self.state.is_running {
            return self.finish();
        }
        self.state.is_running = false;
        self.complete_active_session(SessionStatus::Paused);
        self.record(Event::TimerPaused {
            remaining_secs: self.state.remaining_seconds,
            at: Utc::now(),
        });
        self.persist_all();
        self.finish()
    }

    /// Stop and rewind the current mode. Mode and cycle count are kept.
    pub fn reset(&mut self) -> Vec<Event> {
        self.complete_active_session(SessionStatus::Paused);
        self.state.is_running = false;
        self.state.load_mode(self.state.mode);
        self.record(Event::TimerReset {
            mode: self.state.mode,
            at: Utc::now(),
        });
        self.persist_all();
        self.finish()
    }

    /// Leave the current mode as if its countdown had run out.
    pub fn skip(&mut self) -> Vec<Event> {
        self.advance_mode();
        self.persist_all();
        self.finish()
    }

    /// Jump to `mode` directly. Does not count as a completed work session.
    pub fn set_mode(&mut self, mode: TimerMode) -> Vec<Event> {
        self.complete_active_session(SessionStatus::Completed);
        let from = self.state.mode;
        self.state.is_running = false;
        self.state.load_mode(mode);
        self.record(Event::ModeChanged {
            from,
            to: mode,
            sessions_completed_in_cycle: self.state.sessions_completed_in_cycle,
            running: false,
            at: Utc::now(),
        });
        self.persist_all();
        self.finish()
    }

    /// Change the task time is credited to. While running, the outgoing
    /// session is closed as `switched` without touching its duration and a
    /// fresh one is opened for the new task.
    pub fn set_current_task(&mut self, task: Option<TaskInfo>) -> Vec<Event> {
        let new_id = task.as_ref().map(|t| t.id.clone());
        if new_id == self.state.current_task_id {
            self.task = task;
            self.save_local();
            return self.finish();
        }

        if self.state.active_session.is_some() {
            self.switch_active_session();
        }
        let from = std::mem::replace(&mut self.state.current_task_id, new_id);
        self.task = task;
        self.record(Event::TaskChanged {
            from,
            to: self.state.current_task_id.clone(),
            at: Utc::now(),
        });

        if self.state.is_running {
            self.create_active_session();
        }
        self.persist_all();
        self.finish()
    }

    /// Replace the settings. A stopped countdown is reloaded from the new
    /// duration; a running one is left alone.
    pub fn set_settings(&mut self, settings: TimerSettings) -> Result<Vec<Event>, ValidationError> {
        settings.validate()?;
        self.state.settings = settings;
        if !self.state.is_running {
            self.state.load_mode(self.state.mode);
        }
        self.record(Event::SettingsChanged { at: Utc::now() });
        self.persist_all();
        Ok(self.finish())
    }

    /// Override the arbitration flag, e.g. from a host-side presence signal.
    pub fn set_active_device(&mut self, active: bool) -> Vec<Event> {
        if self.state.is_active_device != active {
            self.state.is_active_device = active;
            self.record(Event::DeviceActivityChanged {
                active,
                at: Utc::now(),
            });
            self.save_local();
        }
        self.finish()
    }

    /// Advance one second. No-op unless running on the active device.
    pub fn tick(&mut self) -> Vec<Event> {
        if !self.state.is_running || !self.state.is_active_device {
            return Vec::new();
        }

        self.account_minutes();

        if self.state.remaining_seconds > 0 {
            self.state.remaining_seconds -= 1;
            self.record(Event::Ticked {
                remaining_secs: self.state.remaining_seconds,
            });
            self.save_local();
            if self.state.remaining_seconds % 60 == 0 {
                self.save_remote();
            }
        } else {
            self.advance_mode();
            self.persist_all();
        }
        self.finish()
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Credit work minutes when the countdown crossed into a lower
    /// whole-minute bucket since the previous tick.
    fn account_minutes(&mut self) {
        if self.state.mode != TimerMode::Work || self.state.active_session.is_none() {
            return;
        }
        let current = self.state.current_minute();
        if let Some(last) = self.state.last_counted_minute {
            if current < last {
                let minutes = match self.options.missed_minutes {
                    MissedMinutePolicy::Elapsed => last - current,
                    MissedMinutePolicy::Single => 1,
                };
                if minutes > 1 {
                    debug!(last, current, minutes, "countdown skipped minute buckets");
                }
                self.update_active_session(minutes);
            }
        }
        self.state.last_counted_minute = Some(current);
    }

    fn advance_mode(&mut self) {
        self.complete_active_session(SessionStatus::Completed);

        let from = self.state.mode;
        let transition = next_transition(
            from,
            self.state.sessions_completed_in_cycle,
            &self.state.settings,
        );
        self.state.sessions_completed_in_cycle = transition.sessions_completed_in_cycle;
        self.state.load_mode(transition.next);
        self.state.is_running = transition.auto_start;
        self.record(Event::ModeChanged {
            from,
            to: transition.next,
            sessions_completed_in_cycle: transition.sessions_completed_in_cycle,
            running: transition.auto_start,
            at: Utc::now(),
        });

        if self.state.is_running {
            self.create_active_session();
        }
    }
}

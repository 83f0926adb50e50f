//! Durable session store contract and an in-memory implementation.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use super::types::{NewWorkSession, SessionPatch, SessionStatus, WorkSession};
use crate::error::StoreError;
use crate::timer::TimerSnapshot;

/// Authoritative, network-backed store of work sessions and of the
/// cross-device timer snapshot. Calls may be slow and may fail.
///
/// The engine only ever creates a session and then sends increments and
/// status patches against it; nothing here does read-modify-write of
/// `duration`.
pub trait SessionStore {
    /// Create a session with `duration = 0` and status `active`; returns
    /// the store-assigned id.
    fn create_session(&self, fields: NewWorkSession) -> Result<String, StoreError>;

    /// Add `minutes` to the session's duration.
    fn increment_duration(&self, session_id: &str, minutes: u64) -> Result<(), StoreError>;

    fn update_session(&self, session_id: &str, patch: SessionPatch) -> Result<(), StoreError>;

    fn get_session(&self, session_id: &str) -> Result<Option<WorkSession>, StoreError>;

    /// Sessions for `user_id` still in status `active`.
    fn get_active_sessions(&self, user_id: &str) -> Result<Vec<WorkSession>, StoreError>;

    fn load_timer_snapshot(&self, user_id: &str) -> Result<Option<TimerSnapshot>, StoreError>;

    fn save_timer_snapshot(&self, user_id: &str, snapshot: &TimerSnapshot)
        -> Result<(), StoreError>;

    /// Close every session left `active` for `user_id` except `keep`.
    /// Returns the number of sessions closed.
    fn cleanup_orphaned_sessions(
        &self,
        user_id: &str,
        keep: Option<&str>,
    ) -> Result<usize, StoreError> {
        let mut closed = 0;
        for session in self.get_active_sessions(user_id)? {
            if keep == Some(session.id.as_str()) {
                continue;
            }
            let ended = session.end_time.unwrap_or(session.updated_at);
            self.update_session(
                &session.id,
                SessionPatch::finalize(SessionStatus::Completed, ended),
            )?;
            closed += 1;
        }
        Ok(closed)
    }
}

impl<T: SessionStore + ?Sized> SessionStore for Rc<T> {
    fn create_session(&self, fields: NewWorkSession) -> Result<String, StoreError> {
        (**self).create_session(fields)
    }
    fn increment_duration(&self, session_id: &str, minutes: u64) -> Result<(), StoreError> {
        (**self).increment_duration(session_id, minutes)
    }
    fn update_session(&self, session_id: &str, patch: SessionPatch) -> Result<(), StoreError> {
        (**self).update_session(session_id, patch)
    }
    fn get_session(&self, session_id: &str) -> Result<Option<WorkSession>, StoreError> {
        (**self).get_session(session_id)
    }
    fn get_active_sessions(&self, user_id: &str) -> Result<Vec<WorkSession>, StoreError> {
        (**self).get_active_sessions(user_id)
    }
    fn load_timer_snapshot(&self, user_id: &str) -> Result<Option<TimerSnapshot>, StoreError> {
        (**self).load_timer_snapshot(user_id)
    }
    fn save_timer_snapshot(
        &self,
        user_id: &str,
        snapshot: &TimerSnapshot,
    ) -> Result<(), StoreError> {
        (**self).save_timer_snapshot(user_id, snapshot)
    }
    fn cleanup_orphaned_sessions(
        &self,
        user_id: &str,
        keep: Option<&str>,
    ) -> Result<usize, StoreError> {
        (**self).cleanup_orphaned_sessions(user_id, keep)
    }
}

/// Counters of calls that reached the store, for assertions in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub creates: usize,
    pub increments: usize,
    pub updates: usize,
    pub snapshot_saves: usize,
    pub snapshot_loads: usize,
}

#[derive(Debug, Default)]
struct MemoryInner {
    sessions: HashMap<String, WorkSession>,
    snapshots: HashMap<String, TimerSnapshot>,
    next_id: u64,
    calls: StoreCalls,
    offline: bool,
}

/// In-memory [`SessionStore`]. Clones share the same backing map, so a test
/// can hand one clone to the engine and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        // A panicking test thread must not take every later assertion down.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every call fail with `StoreError::Unavailable` until reset.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn calls(&self) -> StoreCalls {
        self.lock().calls
    }

    pub fn session(&self, id: &str) -> Option<WorkSession> {
        self.lock().sessions.get(id).cloned()
    }

    /// All sessions, oldest first.
    pub fn sessions(&self) -> Vec<WorkSession> {
        let mut all: Vec<_> = self.lock().sessions.values().cloned().collect();
        all.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
        all
    }

    pub fn sessions_for_task(&self, task_id: &str) -> Vec<WorkSession> {
        self.sessions()
            .into_iter()
            .filter(|s| s.task_id == task_id)
            .collect()
    }

    /// Seed a session as if another device had written it.
    pub fn insert_session(&self, session: WorkSession) {
        self.lock().sessions.insert(session.id.clone(), session);
    }

    pub fn insert_snapshot(&self, user_id: &str, snapshot: TimerSnapshot) {
        self.lock().snapshots.insert(user_id.to_string(), snapshot);
    }

    pub fn snapshot(&self, user_id: &str) -> Option<TimerSnapshot> {
        self.lock().snapshots.get(user_id).cloned()
    }

    fn check_online(inner: &MemoryInner) -> Result<(), StoreError> {
        if inner.offline {
            Err(StoreError::Unavailable("memory store is offline".into()))
        } else {
            Ok(())
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn create_session(&self, fields: NewWorkSession) -> Result<String, StoreError> {
        let mut inner = self.lock();
        Self::check_online(&inner)?;
        inner.next_id += 1;
        inner.calls.creates += 1;
        let id = format!("session-{}", inner.next_id);
        let session = WorkSession {
            id: id.clone(),
            user_id: fields.user_id,
            task_id: fields.task_id,
            project_id: fields.project_id,
            duration: 0,
            session_type: fields.session_type,
            status: SessionStatus::Active,
            start_time: fields.start_time,
            end_time: None,
            updated_at: Utc::now(),
            notes: fields.notes,
        };
        inner.sessions.insert(id.clone(), session);
        Ok(id)
    }

    fn increment_duration(&self, session_id: &str, minutes: u64) -> Result<(), StoreError> {
        let mut inner = self.lock();
        Self::check_online(&inner)?;
        inner.calls.increments += 1;
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        session.duration = session.duration.saturating_add(minutes);
        session.updated_at = Utc::now();
        Ok(())
    }

    fn update_session(&self, session_id: &str, patch: SessionPatch) -> Result<(), StoreError> {
        let mut inner = self.lock();
        Self::check_online(&inner)?;
        inner.calls.updates += 1;
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        if let Some(status) = patch.status {
            session.status = status;
        }
        if let Some(end) = patch.end_time {
            session.end_time = Some(end);
        }
        if let Some(notes) = patch.notes {
            session.notes = Some(notes);
        }
        session.updated_at = Utc::now();
        Ok(())
    }

    fn get_session(&self, session_id: &str) -> Result<Option<WorkSession>, StoreError> {
        let inner = self.lock();
        Self::check_online(&inner)?;
        Ok(inner.sessions.get(session_id).cloned())
    }

    fn get_active_sessions(&self, user_id: &str) -> Result<Vec<WorkSession>, StoreError> {
        let inner = self.lock();
        Self::check_online(&inner)?;
        Ok(inner
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.status == SessionStatus::Active)
            .cloned()
            .collect())
    }

    fn load_timer_snapshot(&self, user_id: &str) -> Result<Option<TimerSnapshot>, StoreError> {
        let mut inner = self.lock();
        Self::check_online(&inner)?;
        inner.calls.snapshot_loads += 1;
        Ok(inner.snapshots.get(user_id).cloned())
    }

    fn save_timer_snapshot(
        &self,
        user_id: &str,
        snapshot: &TimerSnapshot,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        Self::check_online(&inner)?;
        inner.calls.snapshot_saves += 1;
        inner.snapshots.insert(user_id.to_string(), snapshot.clone());
        Ok(())
    }
}

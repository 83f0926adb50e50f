//! SQLite-backed session and task storage.
//!
//! Provides persistent storage for:
//! - Work sessions (the durable session store)
//! - The per-user timer snapshot shared across devices
//! - Tasks and their time-spent counters
//!
//! The CLI uses this as its durable tier; a hosted deployment would put a
//! network service behind the same [`SessionStore`] trait.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::data_dir;
use crate::error::StoreError;
use crate::session::{NewWorkSession, SessionPatch, SessionStatus, SessionStore, WorkSession};
use crate::task::{TaskInfo, TaskLookup};
use crate::timer::TimerSnapshot;

const SESSION_COLUMNS: &str = "id, user_id, task_id, project_id, duration, session_type, status,
     start_time, end_time, updated_at, notes";

/// SQLite database for sessions, snapshots and tasks.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database at `<data_dir>/worktally.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, StoreError> {
        let dir = data_dir().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::open_at(&dir.join("worktally.db"))
    }

    pub fn open_at(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS work_sessions (
                id           TEXT PRIMARY KEY,
                user_id      TEXT NOT NULL,
                task_id      TEXT NOT NULL,
                project_id   TEXT,
                duration     INTEGER NOT NULL DEFAULT 0,
                session_type TEXT NOT NULL,
                status       TEXT NOT NULL,
                start_time   TEXT NOT NULL,
                end_time     TEXT,
                updated_at   TEXT NOT NULL,
                notes        TEXT
            );

            CREATE TABLE IF NOT EXISTS timer_snapshots (
                user_id    TEXT PRIMARY KEY,
                snapshot   TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id             TEXT PRIMARY KEY,
                title          TEXT NOT NULL,
                project_id     TEXT,
                time_spent_min INTEGER NOT NULL DEFAULT 0,
                created_at     TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_work_sessions_user_status ON work_sessions(user_id, status);
            CREATE INDEX IF NOT EXISTS idx_work_sessions_task ON work_sessions(task_id);",
        )?;
        Ok(())
    }

    /// Create a task and return it.
    pub fn add_task(&self, title: &str, project_id: Option<&str>) -> Result<TaskInfo, StoreError> {
        let task = TaskInfo {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            project_id: project_id.map(str::to_string),
            time_spent_min: 0,
        };
        self.conn.execute(
            "INSERT INTO tasks (id, title, project_id, time_spent_min, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![task.id, task.title, task.project_id, Utc::now().to_rfc3339()],
        )?;
        Ok(task)
    }

    pub fn list_tasks(&self) -> Result<Vec<TaskInfo>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, project_id, time_spent_min FROM tasks ORDER BY created_at",
        )?;
        let tasks = stmt
            .query_map([], row_to_task)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Most recent sessions for `user_id`, newest first.
    pub fn list_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<WorkSession>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM work_sessions
             WHERE user_id = ?1 ORDER BY start_time DESC LIMIT ?2"
        ))?;
        let sessions = stmt
            .query_map(params![user_id, limit as i64], row_to_session)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }
}

fn parse_column<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_time(idx, &raw)
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<WorkSession> {
    let end_time = match row.get::<_, Option<String>>(8)? {
        Some(raw) => Some(parse_time(8, &raw)?),
        None => None,
    };
    Ok(WorkSession {
        id: row.get(0)?,
        user_id: row.get(1)?,
        task_id: row.get(2)?,
        project_id: row.get(3)?,
        duration: row.get(4)?,
        session_type: parse_column(row, 5)?,
        status: parse_column(row, 6)?,
        start_time: time_column(row, 7)?,
        end_time,
        updated_at: time_column(row, 9)?,
        notes: row.get(10)?,
    })
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<TaskInfo> {
    Ok(TaskInfo {
        id: row.get(0)?,
        title: row.get(1)?,
        project_id: row.get(2)?,
        time_spent_min: row.get(3)?,
    })
}

impl SessionStore for Database {
    fn create_session(&self, fields: NewWorkSession) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO work_sessions
                (id, user_id, task_id, project_id, duration, session_type, status,
                 start_time, end_time, updated_at, notes)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7, NULL, ?8, ?9)",
            params![
                id,
                fields.user_id,
                fields.task_id,
                fields.project_id,
                fields.session_type.as_str(),
                SessionStatus::Active.as_str(),
                fields.start_time.to_rfc3339(),
                Utc::now().to_rfc3339(),
                fields.notes,
            ],
        )?;
        Ok(id)
    }

    fn increment_duration(&self, session_id: &str, minutes: u64) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE work_sessions SET duration = duration + ?1, updated_at = ?2 WHERE id = ?3",
            params![minutes, Utc::now().to_rfc3339(), session_id],
        )?;
        if changed == 0 {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }

    fn update_session(&self, session_id: &str, patch: SessionPatch) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE work_sessions SET
                status = COALESCE(?1, status),
                end_time = COALESCE(?2, end_time),
                notes = COALESCE(?3, notes),
                updated_at = ?4
             WHERE id = ?5",
            params![
                patch.status.map(SessionStatus::as_str),
                patch.end_time.map(|t| t.to_rfc3339()),
                patch.notes,
                Utc::now().to_rfc3339(),
                session_id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }

    fn get_session(&self, session_id: &str) -> Result<Option<WorkSession>, StoreError> {
        let session = self
            .conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM work_sessions WHERE id = ?1"),
                params![session_id],
                row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    fn get_active_sessions(&self, user_id: &str) -> Result<Vec<WorkSession>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM work_sessions
             WHERE user_id = ?1 AND status = 'active' ORDER BY start_time"
        ))?;
        let sessions = stmt
            .query_map(params![user_id], row_to_session)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    fn load_timer_snapshot(&self, user_id: &str) -> Result<Option<TimerSnapshot>, StoreError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT snapshot FROM timer_snapshots WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save_timer_snapshot(
        &self,
        user_id: &str,
        snapshot: &TimerSnapshot,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(snapshot)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO timer_snapshots (user_id, snapshot, updated_at)
             VALUES (?1, ?2, ?3)",
            params![user_id, json, snapshot.saved_at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn cleanup_orphaned_sessions(
        &self,
        user_id: &str,
        keep: Option<&str>,
    ) -> Result<usize, StoreError> {
        let closed = self.conn.execute(
            "UPDATE work_sessions
             SET status = 'completed', end_time = COALESCE(end_time, updated_at)
             WHERE user_id = ?1 AND status = 'active' AND id IS NOT COALESCE(?2, '')",
            params![user_id, keep],
        )?;
        Ok(closed)
    }
}

impl TaskLookup for Database {
    fn find_task(&self, task_id: &str) -> Result<Option<TaskInfo>, StoreError> {
        let task = self
            .conn
            .query_row(
                "SELECT id, title, project_id, time_spent_min FROM tasks WHERE id = ?1",
                params![task_id],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    fn credit_time(&self, task_id: &str, minutes: u64) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE tasks SET time_spent_min = time_spent_min + ?1 WHERE id = ?2",
            params![minutes, task_id],
        )?;
        if changed == 0 {
            return Err(StoreError::TaskNotFound(task_id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::{TimerMode, TimerState};
    use tempfile::TempDir;

    fn fields(task_id: &str) -> NewWorkSession {
        NewWorkSession {
            user_id: "u1".into(),
            task_id: task_id.into(),
            project_id: Some("p1".into()),
            session_type: TimerMode::Work,
            start_time: Utc::now(),
            notes: None,
        }
    }

    #[test]
    fn session_create_increment_finalize() {
        let db = Database::open_memory().unwrap();
        let id = db.create_session(fields("t1")).unwrap();
        db.increment_duration(&id, 1).unwrap();
        db.increment_duration(&id, 1).unwrap();
        db.update_session(&id, SessionPatch::finalize(SessionStatus::Paused, Utc::now()))
            .unwrap();

        let session = db.get_session(&id).unwrap().unwrap();
        assert_eq!(session.duration, 2);
        assert_eq!(session.status, SessionStatus::Paused);
        assert_eq!(session.session_type, TimerMode::Work);
        assert_eq!(session.project_id.as_deref(), Some("p1"));
        assert!(session.end_time.is_some());
    }

    #[test]
    fn unknown_session_is_reported() {
        let db = Database::open_memory().unwrap();
        assert!(db.get_session("missing").unwrap().is_none());
        assert!(matches!(
            db.increment_duration("missing", 1),
            Err(StoreError::SessionNotFound(_))
        ));
        assert!(matches!(
            db.update_session("missing", SessionPatch::default()),
            Err(StoreError::SessionNotFound(_))
        ));
    }

    #[test]
    fn cleanup_keeps_the_named_session() {
        let db = Database::open_memory().unwrap();
        let orphan = db.create_session(fields("t1")).unwrap();
        let live = db.create_session(fields("t2")).unwrap();

        assert_eq!(db.cleanup_orphaned_sessions("u1", Some(&live)).unwrap(), 1);
        let active: Vec<_> = db
            .get_active_sessions("u1")
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(active, vec![live.clone()]);
        assert_eq!(
            db.get_session(&orphan).unwrap().unwrap().status,
            SessionStatus::Completed
        );

        assert_eq!(db.cleanup_orphaned_sessions("u1", None).unwrap(), 1);
        assert!(db.get_active_sessions("u1").unwrap().is_empty());
    }

    #[test]
    fn timer_snapshot_roundtrip() {
        let db = Database::open_memory().unwrap();
        assert!(db.load_timer_snapshot("u1").unwrap().is_none());

        let mut state = TimerState::default();
        state.is_running = true;
        state.current_task_id = Some("t1".into());
        let snapshot = TimerSnapshot {
            state,
            task: Some(TaskInfo::new("t1", "Draft")),
            user_id: Some("u1".into()),
            device_id: "worktally-a".into(),
            saved_at: Utc::now(),
        };
        db.save_timer_snapshot("u1", &snapshot).unwrap();
        let loaded = db.load_timer_snapshot("u1").unwrap().unwrap();
        assert!(loaded.state.is_running);
        assert_eq!(loaded.task.unwrap().title, "Draft");
        assert_eq!(loaded.device_id, "worktally-a");
    }

    #[test]
    fn tasks_and_credit() {
        let db = Database::open_memory().unwrap();
        let task = db.add_task("Write tests", Some("p1")).unwrap();
        db.credit_time(&task.id, 3).unwrap();

        let found = db.find_task(&task.id).unwrap().unwrap();
        assert_eq!(found.time_spent_min, 3);
        assert_eq!(db.list_tasks().unwrap().len(), 1);
        assert!(matches!(
            db.credit_time("ghost", 1),
            Err(StoreError::TaskNotFound(_))
        ));
    }

    #[test]
    fn file_database_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("worktally.db");
        let id = {
            let db = Database::open_at(&path).unwrap();
            db.create_session(fields("t1")).unwrap()
        };
        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.list_sessions("u1", 10).unwrap()[0].id, id);
    }
}

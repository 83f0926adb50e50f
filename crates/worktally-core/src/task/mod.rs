//! Task lookup seam.
//!
//! Tasks are owned elsewhere; the engine only resolves display fields for
//! the current task and credits worked minutes to its time-spent counter.

mod retry;

pub use retry::{find_task_with_retry, RetryPolicy};

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Denormalized task fields the timer needs for display and for stamping
/// new sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub project_id: Option<String>,
    /// Minutes credited so far.
    #[serde(default)]
    pub time_spent_min: u64,
}

impl TaskInfo {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            project_id: None,
            time_spent_min: 0,
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}

pub trait TaskLookup {
    /// Resolve a task. `Ok(None)` means "not known (yet)"; callers may retry.
    fn find_task(&self, task_id: &str) -> Result<Option<TaskInfo>, StoreError>;

    /// Add `minutes` to the task's time-spent counter. Purely additive.
    fn credit_time(&self, task_id: &str, minutes: u64) -> Result<(), StoreError>;
}

impl<T: TaskLookup + ?Sized> TaskLookup for Rc<T> {
    fn find_task(&self, task_id: &str) -> Result<Option<TaskInfo>, StoreError> {
        (**self).find_task(task_id)
    }
    fn credit_time(&self, task_id: &str, minutes: u64) -> Result<(), StoreError> {
        (**self).credit_time(task_id, minutes)
    }
}

#[derive(Debug, Default)]
struct LookupInner {
    tasks: HashMap<String, TaskInfo>,
    /// Lookups of a task that answer `None` before the task "loads".
    pending_misses: HashMap<String, u32>,
    lookups: usize,
}

/// In-memory [`TaskLookup`]; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryTaskLookup {
    inner: Arc<Mutex<LookupInner>>,
}

impl MemoryTaskLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: impl IntoIterator<Item = TaskInfo>) -> Self {
        let lookup = Self::new();
        for task in tasks {
            lookup.insert(task);
        }
        lookup
    }

    fn lock(&self) -> MutexGuard<'_, LookupInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, task: TaskInfo) {
        self.lock().tasks.insert(task.id.clone(), task);
    }

    /// Answer `None` for the next `misses` lookups of `task_id`, emulating a
    /// task list that has not finished loading.
    pub fn delay_task(&self, task_id: &str, misses: u32) {
        self.lock()
            .pending_misses
            .insert(task_id.to_string(), misses);
    }

    pub fn task(&self, task_id: &str) -> Option<TaskInfo> {
        self.lock().tasks.get(task_id).cloned()
    }

    pub fn lookups(&self) -> usize {
        self.lock().lookups
    }
}

impl TaskLookup for MemoryTaskLookup {
    fn find_task(&self, task_id: &str) -> Result<Option<TaskInfo>, StoreError> {
        let mut inner = self.lock();
        inner.lookups += 1;
        if let Some(remaining) = inner.pending_misses.get_mut(task_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(None);
            }
        }
        Ok(inner.tasks.get(task_id).cloned())
    }

    fn credit_time(&self, task_id: &str, minutes: u64) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let task = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        task.time_spent_min = task.time_spent_min.saturating_add(minutes);
        Ok(())
    }
}

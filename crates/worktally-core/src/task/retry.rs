//! Bounded exponential backoff for task resolution.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{TaskInfo, TaskLookup};

/// Serialized under `[tasks]` in `config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Add up to 50% random jitter to each delay.
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    200
}
fn default_max_delay_ms() -> u64 {
    5_000
}
fn default_true() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: false,
        }
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let spread = base.as_millis() as u64 / 2;
        let extra = rand::thread_rng().gen_range(0..=spread);
        base + Duration::from_millis(extra)
    }
}

/// Resolve `task_id`, retrying both "not found yet" and lookup errors.
/// Returns `None` once every attempt is spent.
pub fn find_task_with_retry<L: TaskLookup + ?Sized>(
    lookup: &L,
    task_id: &str,
    policy: &RetryPolicy,
) -> Option<TaskInfo> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        match lookup.find_task(task_id) {
            Ok(Some(task)) => return Some(task),
            Ok(None) => debug!(task_id, attempt, "task not available yet"),
            Err(e) => debug!(task_id, attempt, error = %e, "task lookup failed"),
        }
        if attempt < attempts {
            std::thread::sleep(policy.delay(attempt));
        }
    }
    warn!(task_id, attempts, "giving up on task lookup");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::MemoryTaskLookup;

    #[test]
    fn delays_double_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter: false,
        };
        assert_eq!(policy.base_delay(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay(3), Duration::from_millis(400));
        assert_eq!(policy.base_delay(5), Duration::from_millis(1_000));
        assert_eq!(policy.base_delay(60), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_within_half_of_base() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter: true,
        };
        for _ in 0..50 {
            let d = policy.delay(2);
            assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(300));
        }
    }

    #[test]
    fn resolves_after_misses() {
        let lookup = MemoryTaskLookup::with_tasks([TaskInfo::new("t1", "Plan sprint")]);
        lookup.delay_task("t1", 2);
        let task = find_task_with_retry(&lookup, "t1", &RetryPolicy::immediate(5));
        assert_eq!(task.map(|t| t.title), Some("Plan sprint".to_string()));
        assert_eq!(lookup.lookups(), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let lookup = MemoryTaskLookup::new();
        assert!(find_task_with_retry(&lookup, "t1", &RetryPolicy::immediate(4)).is_none());
        assert_eq!(lookup.lookups(), 4);
    }
}

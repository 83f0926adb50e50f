//! End-to-end behaviour of the session engine over in-memory collaborators.

use chrono::Utc;
use proptest::prelude::*;

use worktally_core::session::{MemorySessionStore, SessionStatus, WorkSession};
use worktally_core::storage::{MemorySnapshotStore, MissedMinutePolicy, SnapshotStore};
use worktally_core::task::{MemoryTaskLookup, RetryPolicy, TaskInfo};
use worktally_core::timer::{
    ActiveSession, AuthState, EngineOptions, SessionEngine, TimerMode, TimerSettings, TimerSnapshot, TimerState,
    TIMER_STATE_KEY,
};
use worktally_core::Event;

struct Harness {
    engine: SessionEngine,
    store: MemorySessionStore,
    local: MemorySnapshotStore,
    tasks: MemoryTaskLookup,
}

fn harness_with(settings: TimerSettings, missed_minutes: MissedMinutePolicy) -> Harness {
    let store = MemorySessionStore::new();
    let local = MemorySnapshotStore::new();
    let tasks = MemoryTaskLookup::with_tasks([TaskInfo::new("t1", "Draft chapter"), TaskInfo::new("t2", "Review PR")]);
    let engine = SessionEngine::new(
        settings,
        store.clone(),
        local.clone(),
        tasks.clone(),
        EngineOptions {
            device_id: "worktally-device-a".into(),
            task_retry: RetryPolicy::immediate(2),
            missed_minutes,
            ..EngineOptions::default()
        },
    );
    Harness {
        engine,
        store,
        local,
        tasks,
    }
}

fn harness() -> Harness {
    let mut h = harness_with(TimerSettings::default(), MissedMinutePolicy::Elapsed);
    h.engine.initialize_persistence("u1");
    h
}

fn task(id: &str) -> TaskInfo {
    TaskInfo::new(id, format!("Task {id}"))
}

fn ticks(engine: &mut SessionEngine, n: usize) {
    for _ in 0..n {
        engine.tick();
    }
}

fn session_for(store: &MemorySessionStore, task_id: &str) -> WorkSession {
    let mut sessions = store.sessions_for_task(task_id);
    assert_eq!(sessions.len(), 1, "expected one session for {task_id}");
    sessions.remove(0)
}

// ── Scenarios ────────────────────────────────────────────────────────

#[test]
fn scenario_a_sixty_ticks_credit_one_minute() {
    let mut h = harness();
    h.engine.set_current_task(Some(task("t1")));
    h.engine.start();
    ticks(&mut h.engine, 60);

    assert_eq!(h.engine.state().remaining_seconds, 1440);
    assert_eq!(h.store.calls().increments, 1);
    assert_eq!(session_for(&h.store, "t1").duration, 1);
    assert_eq!(h.tasks.task("t1").unwrap().time_spent_min, 1);
}

#[test]
fn scenario_b_switch_mid_run() {
    let mut h = harness();
    h.engine.set_current_task(Some(task("t1")));
    h.engine.start();
    ticks(&mut h.engine, 60);

    h.engine.set_current_task(Some(task("t2")));

    let t1 = session_for(&h.store, "t1");
    assert_eq!(t1.status, SessionStatus::Switched);
    assert_eq!(t1.duration, 1);
    assert!(t1.end_time.is_some());

    let t2 = session_for(&h.store, "t2");
    assert_eq!(t2.status, SessionStatus::Active);
    assert_eq!(t2.duration, 0);
    assert!(h.engine.state().is_running);
}

#[test]
fn scenario_c_fourth_completion_enters_long_break() {
    let mut h = harness();
    for _ in 0..3 {
        h.engine.skip();
        h.engine.skip();
    }
    assert_eq!(h.engine.state().mode, TimerMode::Work);
    assert_eq!(h.engine.state().sessions_completed_in_cycle, 3);

    let short = TimerSettings {
        work: 1,
        ..TimerSettings::default()
    };
    h.engine.set_settings(short).unwrap();
    h.engine.start();
    ticks(&mut h.engine, 61);

    assert_eq!(h.engine.state().sessions_completed_in_cycle, 4);
    assert_eq!(h.engine.state().mode, TimerMode::LongBreak);
    assert_eq!(h.engine.state().remaining_seconds, 15 * 60);
}

#[test]
fn scenario_d_missing_remembered_session_is_replaced() {
    let mut h = harness_with(TimerSettings::default(), MissedMinutePolicy::Elapsed);
    let mut state = TimerState::default();
    state.is_running = true;
    state.remaining_seconds = 1200;
    state.current_task_id = Some("t1".into());
    state.active_session = Some(ActiveSession {
        session_id: "s1".into(),
        task_id: "t1".into(),
        start_time: Utc::now(),
        last_update_time: Utc::now(),
        status: SessionStatus::Active,
    });
    state.last_counted_minute = Some(20);
    let snapshot = TimerSnapshot {
        state,
        task: Some(task("t1")),
        user_id: Some("u1".into()),
        device_id: "worktally-device-a".into(),
        saved_at: Utc::now(),
    };
    h.local
        .set(TIMER_STATE_KEY, &serde_json::to_string(&snapshot).unwrap())
        .unwrap();

    h.engine.initialize_persistence("u1");

    let replaced = h.engine.state().active_session_id().unwrap().to_string();
    assert_ne!(replaced, "s1");
    assert_eq!(h.store.calls().creates, 1);
    assert_eq!(h.store.session(&replaced).unwrap().status, SessionStatus::Active);
    assert!(h.engine.state().is_running);
    assert_eq!(h.engine.state().remaining_seconds, 1200);
}

// ── Properties ───────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_one_increment_per_boundary(n in 1usize..=1500) {
        let mut h = harness();
        h.engine.set_current_task(Some(task("t1")));
        h.engine.start();
        ticks(&mut h.engine, n);

        let first_observed = 1500u64 / 60;
        let last_observed = (1501 - n as u64) / 60;
        let boundaries = first_observed - last_observed;

        prop_assert_eq!(h.store.calls().increments as u64, boundaries);
        prop_assert_eq!(session_for(&h.store, "t1").duration, boundaries);
    }
}

#[test]
fn full_work_block_credits_every_minute() {
    let mut h = harness();
    h.engine.set_current_task(Some(task("t1")));
    h.engine.start();
    ticks(&mut h.engine, 1501);

    let session = session_for(&h.store, "t1");
    assert_eq!(session.duration, 25);
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(h.engine.state().mode, TimerMode::ShortBreak);
}

#[test]
fn switch_never_changes_recorded_duration() {
    let mut h = harness();
    h.engine.set_current_task(Some(task("t1")));
    h.engine.start();
    ticks(&mut h.engine, 185);
    let before = session_for(&h.store, "t1").duration;
    let increments = h.store.calls().increments;

    h.engine.set_current_task(Some(task("t2")));

    assert_eq!(session_for(&h.store, "t1").duration, before);
    assert_eq!(h.store.calls().increments, increments);
}

#[test]
fn reinitializing_resumes_same_session() {
    let mut h = harness();
    h.engine.set_current_task(Some(task("t1")));
    h.engine.start();
    ticks(&mut h.engine, 120);
    let session_id = h.engine.state().active_session_id().unwrap().to_string();

    // Another device, same account, empty local tier.
    let mut other = SessionEngine::new(
        TimerSettings::default(),
        h.store.clone(),
        MemorySnapshotStore::new(),
        h.tasks.clone(),
        EngineOptions {
            device_id: "worktally-device-b".into(),
            task_retry: RetryPolicy::immediate(1),
            ..EngineOptions::default()
        },
    );
    let events = other.initialize_persistence("u1");

    assert_eq!(other.state().active_session_id(), Some(session_id.as_str()));
    assert_eq!(h.store.calls().creates, 1);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::SessionResumed { session_id: id, .. } if *id == session_id)));
}

#[test]
fn pause_credits_partial_minute_before_pausing() {
    let mut h = harness();
    h.engine.set_current_task(Some(task("t1")));
    h.engine.start();
    ticks(&mut h.engine, 61);
    assert_eq!(session_for(&h.store, "t1").duration, 1);

    h.engine.pause();

    let session = session_for(&h.store, "t1");
    assert_eq!(session.duration, 2);
    assert_eq!(session.status, SessionStatus::Paused);
    assert!(!h.engine.state().is_running);
    assert!(h.engine.state().active_session.is_none());
}

#[test]
fn four_work_completions_follow_the_cycle() {
    let mut h = harness();
    let mut breaks = Vec::new();
    for _ in 0..4 {
        assert_eq!(h.engine.state().mode, TimerMode::Work);
        h.engine.skip();
        breaks.push(h.engine.state().mode);
        h.engine.skip();
    }
    assert_eq!(
        breaks,
        vec![
            TimerMode::ShortBreak,
            TimerMode::ShortBreak,
            TimerMode::ShortBreak,
            TimerMode::LongBreak
        ]
    );
}

// ── Missed ticks ─────────────────────────────────────────────────────

/// Push the countdown `seconds` forward without ticking, as a stalled
/// heartbeat would.
fn stall(h: &mut Harness, seconds: u64) {
    let mut state = h.engine.state().clone();
    state.remaining_seconds -= seconds;
    let snapshot = TimerSnapshot {
        state,
        task: h.engine.current_task().cloned(),
        user_id: h.engine.user_id().map(str::to_string),
        device_id: h.engine.device_id().to_string(),
        saved_at: Utc::now(),
    };
    h.engine.apply_external_snapshot(snapshot);
}

#[test]
fn stalled_heartbeat_credits_every_missed_minute_by_default() {
    let mut h = harness();
    h.engine.set_current_task(Some(task("t1")));
    h.engine.start();
    ticks(&mut h.engine, 2);
    let before = session_for(&h.store, "t1").duration;
    stall(&mut h, 180);
    h.engine.tick();

    assert!(h.engine.state().is_active_device);
    assert_eq!(session_for(&h.store, "t1").duration, before + 3);
}

#[test]
fn stalled_heartbeat_credits_one_minute_under_single_policy() {
    let mut h = harness_with(TimerSettings::default(), MissedMinutePolicy::Single);
    h.engine.initialize_persistence("u1");
    h.engine.set_current_task(Some(task("t1")));
    h.engine.start();
    ticks(&mut h.engine, 2);
    let before = session_for(&h.store, "t1").duration;
    stall(&mut h, 180);
    h.engine.tick();

    assert_eq!(session_for(&h.store, "t1").duration, before + 1);
}

// ── Write throttling ─────────────────────────────────────────────────

#[test]
fn durable_snapshot_on_minute_boundaries_local_on_every_tick() {
    let mut h = harness();
    h.engine.set_current_task(Some(task("t1")));
    let saves = h.store.calls().snapshot_saves;
    h.engine.start();
    assert_eq!(h.store.calls().snapshot_saves, saves + 1);

    let writes = h.local.writes();
    for n in 1..=120 {
        h.engine.tick();
        assert_eq!(h.local.writes(), writes + n);
    }
    // Boundaries at 1440 and 1380.
    assert_eq!(h.store.calls().snapshot_saves, saves + 3);

    h.engine.pause();
    assert_eq!(h.store.calls().snapshot_saves, saves + 4);
}

#[test]
fn inactive_device_commands_make_no_durable_writes() {
    let commands: [fn(&mut SessionEngine) -> Vec<Event>; 4] = [
        |e| e.pause(),
        |e| e.skip(),
        |e| e.reset(),
        |e| e.set_current_task(Some(task("t2"))),
    ];
    for command in commands {
        let mut h = harness();
        h.engine.set_current_task(Some(task("t1")));
        h.engine.start();
        // One minute credited, a second one pending flush.
        ticks(&mut h.engine, 61);
        h.engine.set_active_device(false);
        let calls = h.store.calls();

        command(&mut h.engine);

        assert_eq!(h.store.calls(), calls);
        assert_eq!(h.tasks.task("t1").unwrap().time_spent_min, 1);
        let session = session_for(&h.store, "t1");
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.duration, 1);
        assert!(h.store.sessions_for_task("t2").is_empty());
    }
}

// ── Accounts ─────────────────────────────────────────────────────────

#[test]
fn switching_user_stops_crediting_previous_user() {
    let mut h = harness_with(TimerSettings::default(), MissedMinutePolicy::Elapsed);
    h.engine.handle_auth(AuthState::Authenticated("alice".into()));
    h.engine.set_current_task(Some(task("t1")));
    h.engine.start();
    let alice_session = h.engine.state().active_session_id().unwrap().to_string();

    h.engine.handle_auth(AuthState::Authenticated("bob".into()));
    assert_eq!(h.engine.user_id(), Some("bob"));
    assert!(h.engine.state().active_session.is_none());
    assert!(h.engine.state().current_task_id.is_none());
    assert!(!h.engine.state().is_running);
    ticks(&mut h.engine, 120);

    let session = h.store.session(&alice_session).unwrap();
    assert_eq!(session.user_id, "alice");
    assert_eq!(session.duration, 0);
    assert!(h.store.sessions().iter().all(|s| s.user_id == "alice"));
    assert!(h
        .store
        .snapshot("bob")
        .map_or(true, |s| s.user_id.as_deref() == Some("bob") && !s.state.is_running));
}

// ── Arbitration ──────────────────────────────────────────────────────

#[test]
fn last_device_to_start_wins_without_lock() {
    let mut a = harness();
    a.engine.set_current_task(Some(task("t1")));
    a.engine.start();
    ticks(&mut a.engine, 2);

    let mut b = SessionEngine::new(
        TimerSettings::default(),
        a.store.clone(),
        MemorySnapshotStore::new(),
        a.tasks.clone(),
        EngineOptions {
            device_id: "worktally-device-b".into(),
            task_retry: RetryPolicy::immediate(1),
            ..EngineOptions::default()
        },
    );
    b.initialize_persistence("u1");

    let pushed = TimerSnapshot {
        state: a.engine.state().clone(),
        task: a.engine.current_task().cloned(),
        user_id: a.engine.user_id().map(str::to_string),
        device_id: a.engine.device_id().to_string(),
        saved_at: Utc::now(),
    };
    let events = b.apply_external_snapshot(pushed);
    assert!(!b.state().is_active_device);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::DeviceActivityChanged { active: false, .. })));

    // Observing devices never advance the countdown.
    let remaining = b.state().remaining_seconds;
    assert!(b.tick().is_empty());
    assert_eq!(b.state().remaining_seconds, remaining);

    // B claims the timer. A was never told, so both now write.
    b.start();
    assert!(b.state().is_active_device);
    assert!(a.engine.state().is_active_device);
    ticks(&mut a.engine, 60);
    ticks(&mut b, 60);

    let shared = session_for(&a.store, "t1");
    assert_eq!(a.store.calls().creates, 1);
    assert_eq!(shared.duration, 3);
}

#[test]
fn snapshot_from_own_device_keeps_active_flag() {
    let mut h = harness();
    h.engine.start();
    let pushed = TimerSnapshot {
        state: h.engine.state().clone(),
        task: None,
        user_id: None,
        device_id: h.engine.device_id().to_string(),
        saved_at: Utc::now(),
    };
    h.engine.apply_external_snapshot(pushed);
    assert!(h.engine.state().is_active_device);
}

// ── Degraded persistence ─────────────────────────────────────────────

#[test]
fn offline_store_never_stops_the_countdown() {
    let mut h = harness();
    h.engine.set_current_task(Some(task("t1")));
    h.engine.start();
    h.store.set_offline(true);

    ticks(&mut h.engine, 120);
    h.engine.pause();

    assert_eq!(h.engine.state().remaining_seconds, 1380);
    assert!(!h.engine.state().is_running);
    assert_eq!(session_for(&h.store, "t1").duration, 0);
    // Task credit is independent of the session store.
    assert_eq!(h.tasks.task("t1").unwrap().time_spent_min, 2);
}

#[test]
fn next_write_after_outage_sends_full_state() {
    let mut h = harness();
    h.engine.start();
    h.store.set_offline(true);
    ticks(&mut h.engine, 60);
    assert!(h.store.snapshot("u1").map_or(true, |s| s.state.remaining_seconds != 1440));

    h.store.set_offline(false);
    ticks(&mut h.engine, 60);
    assert_eq!(h.store.snapshot("u1").unwrap().state.remaining_seconds, 1380);
}

#[test]
fn late_task_resolves_with_retry() {
    let mut h = harness();
    h.engine.set_current_task(Some(TaskInfo::new("t3", "Stale title")));
    h.tasks.insert(TaskInfo::new("t3", "Fresh title").with_project("p1"));
    h.tasks.delay_task("t3", 1);

    let mut reloaded = SessionEngine::new(
        TimerSettings::default(),
        h.store.clone(),
        h.local.clone(),
        h.tasks.clone(),
        EngineOptions {
            task_retry: RetryPolicy::immediate(2),
            ..EngineOptions::default()
        },
    );
    reloaded.initialize_persistence("u1");

    let resolved = reloaded.current_task().unwrap();
    assert_eq!(resolved.title, "Fresh title");
    assert_eq!(resolved.project_id.as_deref(), Some("p1"));
}

#[test]
fn reload_sweeps_orphans_but_keeps_active() {
    let mut h = harness();
    h.engine.set_current_task(Some(task("t1")));
    h.engine.start();
    let active = h.engine.state().active_session_id().unwrap().to_string();
    let mut orphan = h.store.session(&active).unwrap();
    orphan.id = "orphan-1".into();
    h.store.insert_session(orphan);

    let mut reloaded = SessionEngine::new(
        TimerSettings::default(),
        h.store.clone(),
        h.local.clone(),
        h.tasks.clone(),
        EngineOptions {
            task_retry: RetryPolicy::immediate(1),
            ..EngineOptions::default()
        },
    );
    let events = reloaded.initialize_persistence("u1");

    assert!(events.iter().any(|e| matches!(e, Event::OrphansCleaned { closed: 1, .. })));
    assert_eq!(h.store.session("orphan-1").unwrap().status, SessionStatus::Completed);
    assert_eq!(h.store.session(&active).unwrap().status, SessionStatus::Active);
}

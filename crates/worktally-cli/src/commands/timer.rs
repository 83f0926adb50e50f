use std::time::Duration;

use clap::Subcommand;
use serde::Serialize;
use tracing::info;
use worktally_core::task::TaskLookup;
use worktally_core::timer::TimerMode;
use worktally_core::{Event, SessionEngine, TaskInfo, TimerState};

use super::{CliResult, Context};

#[derive(Subcommand)]
pub enum TimerAction {
    /// Start or resume the countdown and claim this device
    Start,
    /// Pause the countdown, closing the current work session
    Pause,
    /// Rewind the current mode
    Reset,
    /// End the current mode and move to the next one
    Skip,
    /// Advance the countdown without waiting for the clock
    Tick {
        #[arg(long, default_value = "1")]
        count: u64,
    },
    /// Switch mode directly (work, short-break, long-break)
    Mode { mode: TimerMode },
    /// Credit time to a task
    Task { id: String },
    /// Stop crediting time to any task
    ClearTask,
    /// Print current timer state as JSON
    Status,
    /// Drive the countdown in the foreground, one tick per second
    Run {
        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,
    },
}

#[derive(Serialize)]
struct Report<'a> {
    state: &'a TimerState,
    task: Option<&'a TaskInfo>,
    events: Vec<Event>,
}

/// Print state and events. Per-second `Ticked` events are left out.
fn print_report(engine: &SessionEngine, events: Vec<Event>) -> CliResult {
    let report = Report {
        state: engine.state(),
        task: engine.current_task(),
        events: events
            .into_iter()
            .filter(|e| !matches!(e, Event::Ticked { .. }))
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub fn run(action: TimerAction) -> CliResult {
    let ctx = Context::open()?;
    let (mut engine, _) = ctx.engine()?;

    let events = match action {
        TimerAction::Start => engine.start(),
        TimerAction::Pause => engine.pause(),
        TimerAction::Reset => engine.reset(),
        TimerAction::Skip => engine.skip(),
        TimerAction::Tick { count } => {
            let mut events = Vec::new();
            for _ in 0..count {
                events.extend(engine.tick());
            }
            events
        }
        TimerAction::Mode { mode } => engine.set_mode(mode),
        TimerAction::Task { id } => {
            let task = ctx
                .db
                .find_task(&id)?
                .ok_or_else(|| format!("task not found: {id}"))?;
            engine.set_current_task(Some(task))
        }
        TimerAction::ClearTask => engine.set_current_task(None),
        TimerAction::Status => Vec::new(),
        TimerAction::Run { ticks } => return run_foreground(&mut engine, ticks),
    };

    print_report(&engine, events)
}

/// One tick per second until Ctrl-C, `max_ticks`, or the timer stops.
fn run_foreground(engine: &mut SessionEngine, max_ticks: Option<u64>) -> CliResult {
    let mut events = Vec::new();
    if !engine.state().is_running || !engine.state().is_active_device {
        events.extend(engine.start());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        // The first tick completes immediately.
        interval.tick().await;

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let mut count = 0u64;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for event in engine.tick() {
                        if !matches!(event, Event::Ticked { .. }) {
                            eprintln!("{}", serde_json::to_string(&event)?);
                            events.push(event);
                        }
                    }
                    count += 1;
                    if !engine.state().is_running || max_ticks.is_some_and(|max| count >= max) {
                        break;
                    }
                }
                _ = &mut ctrl_c => {
                    info!(ticks = count, "interrupted");
                    break;
                }
            }
        }
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;

    print_report(engine, events)
}

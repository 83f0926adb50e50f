use clap::Subcommand;
use serde_json::json;
use worktally_core::session::SessionStore;
use worktally_core::Event;

use super::{CliResult, Context};

#[derive(Subcommand)]
pub enum SessionsAction {
    /// Most recent work sessions for the configured account
    List {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Sessions still marked active
    Active,
    /// Close active sessions the timer is no longer using
    Cleanup,
}

pub fn run(action: SessionsAction) -> CliResult {
    let ctx = Context::open()?;
    let user_id = ctx.config.account.user_id.clone();
    match action {
        SessionsAction::List { limit } => {
            let sessions = ctx.db.list_sessions(&user_id, limit)?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
        }
        SessionsAction::Active => {
            let sessions = ctx.db.get_active_sessions(&user_id)?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
        }
        SessionsAction::Cleanup => {
            // Initialization already sweeps once; count both passes.
            let (mut engine, mut events) = ctx.engine()?;
            events.extend(engine.cleanup_orphaned_sessions());
            let closed: usize = events
                .iter()
                .map(|e| match e {
                    Event::OrphansCleaned { closed, .. } => *closed,
                    _ => 0,
                })
                .sum();
            let kept = engine.state().active_session_id();
            println!("{}", serde_json::to_string_pretty(&json!({ "closed": closed, "kept": kept }))?);
        }
    }
    Ok(())
}

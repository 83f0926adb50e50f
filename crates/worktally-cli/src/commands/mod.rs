pub mod config;
pub mod sessions;
pub mod task;
pub mod timer;

use std::error::Error;
use std::rc::Rc;

use tracing::debug;
use worktally_core::storage::FileSnapshotStore;
use worktally_core::sync::get_or_create_device_id;
use worktally_core::timer::AuthState;
use worktally_core::{Config, Database, EngineOptions, Event, SessionEngine};

pub type CliResult<T = ()> = Result<T, Box<dyn Error>>;

/// Configuration and the durable store, opened against the data directory.
pub struct Context {
    pub config: Config,
    pub db: Rc<Database>,
}

impl Context {
    pub fn open() -> worktally_core::error::Result<Self> {
        let config = Config::load()?;
        let db = Rc::new(Database::open()?);
        Ok(Self { config, db })
    }

    /// Build an engine and initialize it for the configured account.
    /// Returns the events produced while restoring state.
    pub fn engine(&self) -> CliResult<(SessionEngine, Vec<Event>)> {
        let device_id = get_or_create_device_id()?;
        let snapshots = FileSnapshotStore::open_default()?;
        let mut engine = SessionEngine::new(
            self.config.timer.clone(),
            Rc::clone(&self.db),
            snapshots,
            Rc::clone(&self.db),
            EngineOptions::from_config(&self.config, device_id),
        );
        let events = engine.handle_auth(AuthState::Authenticated(self.config.account.user_id.clone()));
        debug!(count = events.len(), "engine initialized");
        Ok((engine, events))
    }
}

//! # Worktally Core Library
//!
//! Core logic for a Pomodoro-style countdown that accounts worked time into
//! durable work sessions. The CLI in `worktally-cli` is a thin layer over
//! this crate.
//!
//! ## Architecture
//!
//! - **Timer Engine**: A tick-driven state machine. The caller invokes
//!   `tick()` once per second while the timer runs.
//! - **Sessions**: Every continuous run on a task becomes one `WorkSession`
//!   whose duration grows by whole minutes.
//! - **Storage**: SQLite-backed session store, a JSON file as the local
//!   snapshot tier and TOML-based configuration.
//! - **Sync**: Device identity for advisory multi-device arbitration.
//!
//! ## Key Components
//!
//! - [`SessionEngine`]: Timer, session lifecycle and reconciliation
//! - [`Database`]: Session, task and snapshot persistence
//! - [`Config`]: Application configuration management

pub mod error;
pub mod events;
pub mod session;
pub mod storage;
pub mod sync;
pub mod task;
pub mod timer;

pub use error::{ConfigError, CoreError, SnapshotError, StoreError, ValidationError};
pub use events::{Event, RestoreSource};
pub use session::{MemorySessionStore, SessionStatus, SessionStore, WorkSession};
pub use storage::{Config, Database, FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use task::{MemoryTaskLookup, RetryPolicy, TaskInfo, TaskLookup};
pub use timer::{
    AuthState, EngineOptions, Lifecycle, SessionEngine, TimerMode, TimerSettings, TimerSnapshot,
    TimerState,
};

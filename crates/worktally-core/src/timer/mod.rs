//! Countdown state machine and the work sessions it drives.

mod engine;
mod mode;
mod reconcile;
mod sessions;
mod settings;
mod state;

pub use engine::{AuthState, EngineOptions, Lifecycle, SessionEngine, SubscriptionId};
pub use mode::{next_transition, TimerMode, Transition};
pub use reconcile::{LAST_REMOTE_SYNC_KEY, TIMER_STATE_KEY};
pub use settings::TimerSettings;
pub use state::{ActiveSession, TimerSnapshot, TimerState};

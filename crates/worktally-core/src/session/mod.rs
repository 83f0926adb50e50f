//! Work-session records and the durable store they live in.

mod store;
mod types;

pub use store::{MemorySessionStore, SessionStore, StoreCalls};
pub use types::{NewWorkSession, SessionPatch, SessionStatus, WorkSession};

mod config;
pub mod database;
pub mod snapshot;

pub use config::{AccountConfig, AccountingConfig, Config, MissedMinutePolicy, SyncConfig};
pub use database::Database;
pub use snapshot::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns the data directory, creating it if needed.
///
/// `WORKTALLY_DATA_DIR` wins when set. Otherwise `~/.config/worktally[-dev]/`
/// based on `WORKTALLY_ENV` (set it to `dev` for the development directory).
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("WORKTALLY_DATA_DIR") {
        Some(explicit) => PathBuf::from(explicit),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("WORKTALLY_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("worktally-dev")
            } else {
                base_dir.join("worktally")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}

// Device ID management for cross-device arbitration
// Format: "worktally-<uuid>"

use std::fs;
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

const DEVICE_ID_FILE: &str = "device_id.txt";
const DEVICE_ID_PREFIX: &str = "worktally-";

/// Error type for device ID operations
#[derive(Debug, thiserror::Error)]
pub enum DeviceIdError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid device ID format: {0}")]
    InvalidFormat(String),
}

/// Get or create the device ID stored under `path`.
///
/// Every snapshot this device writes is stamped with the ID, which is how
/// another device tells that a pushed state did not come from itself.
pub fn get_or_create_device_id_at(path: &Path) -> Result<String, DeviceIdError> {
    let device_id_path = path.join(DEVICE_ID_FILE);

    if device_id_path.exists() {
        let content = fs::read_to_string(&device_id_path)?;
        let device_id = content.trim().to_string();

        if device_id.starts_with(DEVICE_ID_PREFIX) {
            return Ok(device_id);
        }
        return Err(DeviceIdError::InvalidFormat(device_id));
    }

    let device_id = new_device_id();

    if !path.exists() {
        fs::create_dir_all(path)?;
    }

    let mut file = fs::File::create(&device_id_path)?;
    writeln!(file, "{}", device_id)?;

    Ok(device_id)
}

/// Get or create the device ID in the default data directory.
pub fn get_or_create_device_id() -> Result<String, DeviceIdError> {
    let data_dir = crate::storage::data_dir()
        .map_err(|e| DeviceIdError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string())))?;
    get_or_create_device_id_at(&data_dir)
}

/// A fresh, unpersisted device ID.
pub fn new_device_id() -> String {
    format!("{}{}", DEVICE_ID_PREFIX, Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_device_id_format() {
        let temp_dir = TempDir::new().unwrap();
        let device_id = get_or_create_device_id_at(temp_dir.path()).unwrap();

        assert!(device_id.starts_with(DEVICE_ID_PREFIX));
        assert_eq!(device_id.len(), DEVICE_ID_PREFIX.len() + 36);
    }

    #[test]
    fn test_device_id_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let first = get_or_create_device_id_at(temp_dir.path()).unwrap();
        let second = get_or_create_device_id_at(temp_dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_device_id_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir.path().join("nested/path");

        let device_id = get_or_create_device_id_at(&nested_path).unwrap();

        assert!(nested_path.exists());
        assert!(device_id.starts_with(DEVICE_ID_PREFIX));
    }

    #[test]
    fn test_device_id_invalid_format_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut file = fs::File::create(temp_dir.path().join(DEVICE_ID_FILE)).unwrap();
        writeln!(file, "pomodoro-123").unwrap();

        let result = get_or_create_device_id_at(temp_dir.path());
        assert!(matches!(result, Err(DeviceIdError::InvalidFormat(_))));
    }

    #[test]
    fn test_fresh_ids_differ() {
        assert_ne!(new_device_id(), new_device_id());
    }
}

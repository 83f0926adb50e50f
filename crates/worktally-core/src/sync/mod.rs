//! Cross-device identity.
//!
//! Arbitration between devices is advisory: the last device to start the
//! timer wins, and nothing stops two devices from both believing they are
//! active. The device ID only lets an engine recognise its own writes.

pub mod device_id;

pub use device_id::{get_or_create_device_id, get_or_create_device_id_at, new_device_id, DeviceIdError};

//! Local device state for the hub bridge.
//!
//! Reads battery, charger and backlight state from platform-specific
//! sources and renders it as hub sensor reports. [`ScreenControl`] applies
//! the hub's brightness and keep-awake commands back to the device.

mod collector;
mod control;
mod state;

#[cfg(target_os = "linux")]
#[path = "sysfs_linux.rs"]
mod platform;

#[cfg(not(target_os = "linux"))]
#[path = "sysfs_other.rs"]
mod platform;

pub use collector::{Collector, SendFn, collect};
pub use control::ScreenControl;
pub use state::{ChargingType, DeviceState, SensorReport, sensor_entity_id};

//! Device state snapshot and its hub sensor representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use linkmate_protocol::{Attributes, StateReport};

/// How the device is being charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargingType {
    Ac,
    Usb,
    Wireless,
    #[default]
    None,
    Unknown,
}

impl ChargingType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ac => "ac",
            Self::Usb => "usb",
            Self::Wireless => "wireless",
            Self::None => "none",
            Self::Unknown => "unknown",
        }
    }

    pub(crate) fn from_sysfs(kind: &str) -> Self {
        match kind {
            "ac" => Self::Ac,
            "usb" => Self::Usb,
            "wireless" => Self::Wireless,
            "none" => Self::None,
            _ => Self::Unknown,
        }
    }
}

/// Point-in-time state of the local device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    /// Battery charge 0-100, or -1 when there is no battery.
    pub battery_level: i32,
    pub is_charging: bool,
    pub charging_type: ChargingType,
    /// Screen brightness 0-255.
    pub screen_brightness: u8,
    pub is_screen_on: bool,
    /// A keep-awake request from the hub is being held.
    #[serde(default)]
    pub keep_screen_on: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Location accuracy in metres.
    pub location_accuracy: Option<f32>,
    pub timestamp: DateTime<Utc>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            battery_level: -1,
            is_charging: false,
            charging_type: ChargingType::None,
            screen_brightness: 0,
            is_screen_on: true,
            keep_screen_on: false,
            latitude: None,
            longitude: None,
            location_accuracy: None,
            timestamp: Utc::now(),
        }
    }
}

/// One sensor to write to the hub.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReport {
    /// Sensor key, e.g. `battery_level`.
    pub key: &'static str,
    pub entity_id: String,
    pub report: StateReport,
}

/// Entity id of a device sensor: `sensor.<device_id>_<key>`.
pub fn sensor_entity_id(device_id: &str, key: &str) -> String {
    format!("sensor.{device_id}_{key}")
}

impl DeviceState {
    pub fn has_location(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    /// The five sensors reported for this device.
    pub fn to_sensor_reports(&self, device_id: &str, device_name: &str) -> Vec<SensorReport> {
        let sensor = |key: &'static str, state: serde_json::Value, attributes: Attributes| {
            SensorReport {
                key,
                entity_id: sensor_entity_id(device_id, key),
                report: StateReport::new(state, attributes),
            }
        };

        vec![
            sensor(
                "battery_level",
                json!(self.battery_level),
                attributes([
                    ("unit_of_measurement", json!("%")),
                    ("device_class", json!("battery")),
                    ("friendly_name", json!(format!("{device_name} Battery level"))),
                ]),
            ),
            sensor(
                "battery_charging",
                json!(if self.is_charging { "charging" } else { "not_charging" }),
                attributes([
                    ("charging_type", json!(self.charging_type.as_str())),
                    ("friendly_name", json!(format!("{device_name} Charging"))),
                ]),
            ),
            sensor(
                "screen_brightness",
                json!(self.screen_brightness),
                attributes([
                    ("unit_of_measurement", json!("level")),
                    ("friendly_name", json!(format!("{device_name} Screen brightness"))),
                ]),
            ),
            sensor(
                "screen_state",
                json!(if self.is_screen_on { "on" } else { "off" }),
                attributes([
                    ("keep_screen_on", json!(self.keep_screen_on)),
                    ("friendly_name", json!(format!("{device_name} Screen"))),
                ]),
            ),
            sensor(
                "location",
                json!(if self.has_location() { "home" } else { "unknown" }),
                attributes([
                    ("latitude", json!(self.latitude)),
                    ("longitude", json!(self.longitude)),
                    ("gps_accuracy", json!(self.location_accuracy)),
                    ("friendly_name", json!(format!("{device_name} Location"))),
                ]),
            ),
        ]
    }
}

fn attributes<const N: usize>(pairs: [(&str, serde_json::Value); N]) -> Attributes {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

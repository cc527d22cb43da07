//! Typed view of `call_service` events.
//!
//! The hub reports every service invocation with loosely typed
//! `service_data`. The parameters the client cares about are validated
//! here, once, into [`ServiceCallParams`].

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::Attributes;

/// A parsed `call_service` event body. Used only as synthesis input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCallEvent {
    pub domain: String,
    pub service: String,
    #[serde(default)]
    pub service_data: Option<Attributes>,
    #[serde(default)]
    pub target: Option<Attributes>,
}

/// Known `(domain, service)` parameter shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCallParams {
    /// `light.turn_on`; brightness already resolved to 0-255.
    LightTurnOn { brightness: u8 },
    LightTurnOff,
    SwitchTurnOn,
    SwitchTurnOff,
    Unrecognized { domain: String, service: String },
}

impl ServiceCallEvent {
    /// Parses the `data` object of a `call_service` event.
    pub fn from_event_data(data: &serde_json::Value) -> Result<Self, ProtocolError> {
        Ok(Self::deserialize(data)?)
    }

    /// Entity the call is aimed at.
    ///
    /// The structured `target` map wins over the legacy flat `service_data`
    /// form. When the id is a list, its first element is used.
    pub fn target_entity_id(&self) -> Option<&str> {
        self.target
            .as_ref()
            .and_then(entity_id_in)
            .or_else(|| self.service_data.as_ref().and_then(entity_id_in))
    }

    /// Classifies the call and validates its parameters.
    pub fn params(&self) -> ServiceCallParams {
        match (self.domain.as_str(), self.service.as_str()) {
            ("light", "turn_on") => ServiceCallParams::LightTurnOn {
                brightness: self.requested_brightness(),
            },
            ("light", "turn_off") => ServiceCallParams::LightTurnOff,
            ("switch", "turn_on") => ServiceCallParams::SwitchTurnOn,
            ("switch", "turn_off") => ServiceCallParams::SwitchTurnOff,
            (domain, service) => ServiceCallParams::Unrecognized {
                domain: domain.to_string(),
                service: service.to_string(),
            },
        }
    }

    /// `brightness` (0-255) takes precedence over `brightness_pct` (0-100).
    /// Neither present means full brightness.
    fn requested_brightness(&self) -> u8 {
        let data = self.service_data.as_ref();
        let number = |key: &str| data.and_then(|d| d.get(key)).and_then(serde_json::Value::as_f64);

        if let Some(raw) = number("brightness") {
            return clamp_brightness(raw);
        }
        if let Some(pct) = number("brightness_pct") {
            // pct * 255 / 100 keeps 50% exactly at 127.5, which rounds to 128.
            return clamp_brightness(pct * 255.0 / 100.0);
        }
        u8::MAX
    }
}

fn clamp_brightness(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 255.0) as u8
}

fn entity_id_in(map: &Attributes) -> Option<&str> {
    match map.get("entity_id")? {
        serde_json::Value::String(id) => Some(id.as_str()),
        serde_json::Value::Array(ids) => ids.first().and_then(serde_json::Value::as_str),
        _ => None,
    }
}

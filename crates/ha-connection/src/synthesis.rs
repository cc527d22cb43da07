//! Local state synthesis for virtual entities.
//!
//! Virtual entities (the device's screen-brightness light and keep-awake
//! switch) may have no state on the hub. When a service call targets one
//! of them, a plausible [`EntityState`] is built from the call itself.

use serde_json::json;
use tracing::trace;

use linkmate_protocol::{Attributes, EntityState, ServiceCallEvent, ServiceCallParams};

/// What a virtual entity controls on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualKind {
    BrightnessLight,
    KeepAwakeSwitch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct VirtualEntity {
    entity_id: String,
    kind: VirtualKind,
    friendly_name: String,
}

/// Whitelist of entity ids eligible for synthesis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualEntities {
    entities: Vec<VirtualEntity>,
}

impl VirtualEntities {
    /// The two virtual entities exposed by `device_id`:
    /// `light.<id>_screen_brightness` and `switch.<id>_keep_screen_on`.
    pub fn for_device(device_id: &str) -> Self {
        Self::default()
            .with_brightness_light(
                format!("light.{device_id}_screen_brightness"),
                "Screen brightness",
            )
            .with_keep_awake_switch(
                format!("switch.{device_id}_keep_screen_on"),
                "Keep screen on",
            )
    }

    pub fn with_brightness_light(
        mut self,
        entity_id: impl Into<String>,
        friendly_name: impl Into<String>,
    ) -> Self {
        self.push(entity_id.into(), VirtualKind::BrightnessLight, friendly_name.into());
        self
    }

    pub fn with_keep_awake_switch(
        mut self,
        entity_id: impl Into<String>,
        friendly_name: impl Into<String>,
    ) -> Self {
        self.push(entity_id.into(), VirtualKind::KeepAwakeSwitch, friendly_name.into());
        self
    }

    fn push(&mut self, entity_id: String, kind: VirtualKind, friendly_name: String) {
        self.entities.retain(|e| e.entity_id != entity_id);
        self.entities.push(VirtualEntity {
            entity_id,
            kind,
            friendly_name,
        });
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.find(entity_id).is_some()
    }

    pub fn kind_of(&self, entity_id: &str) -> Option<VirtualKind> {
        self.find(entity_id).map(|e| e.kind)
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(|e| e.entity_id.as_str())
    }

    fn find(&self, entity_id: &str) -> Option<&VirtualEntity> {
        self.entities.iter().find(|e| e.entity_id == entity_id)
    }

    /// Builds the state implied by `call`, or `None` when the call does
    /// not target a whitelisted entity with a service that applies to it.
    pub fn synthesize(&self, call: &ServiceCallEvent) -> Option<EntityState> {
        let target = call.target_entity_id()?;
        let Some(entity) = self.find(target) else {
            trace!(entity_id = target, "service call for a non-virtual entity");
            return None;
        };

        let (state, attributes) = match (entity.kind, call.params()) {
            (VirtualKind::BrightnessLight, ServiceCallParams::LightTurnOn { brightness }) => {
                let mut attrs = light_attributes(&entity.friendly_name);
                attrs.insert("brightness".into(), json!(brightness));
                attrs.insert("color_mode".into(), json!("brightness"));
                ("on", attrs)
            }
            (VirtualKind::BrightnessLight, ServiceCallParams::LightTurnOff) => {
                ("off", light_attributes(&entity.friendly_name))
            }
            (VirtualKind::KeepAwakeSwitch, ServiceCallParams::SwitchTurnOn) => {
                ("on", switch_attributes(&entity.friendly_name))
            }
            (VirtualKind::KeepAwakeSwitch, ServiceCallParams::SwitchTurnOff) => {
                ("off", switch_attributes(&entity.friendly_name))
            }
            (_, params) => {
                trace!(entity_id = target, ?params, "service does not apply to virtual entity");
                return None;
            }
        };

        Some(EntityState::synthesized(&entity.entity_id, state, attributes))
    }
}

fn light_attributes(friendly_name: &str) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert("supported_features".into(), json!(1));
    attrs.insert("supported_color_modes".into(), json!(["brightness"]));
    attrs.insert("friendly_name".into(), json!(friendly_name));
    attrs
}

fn switch_attributes(friendly_name: &str) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert("friendly_name".into(), json!(friendly_name));
    attrs.insert("icon".into(), json!("mdi:monitor-screenshot"));
    attrs
}

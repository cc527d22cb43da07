use serde::{Deserialize, Serialize};

/// Heterogeneous key/value attribute map, as sent by the hub.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Where an [`EntityState`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateOrigin {
    /// Pushed or returned by the hub itself.
    #[default]
    Hub,
    /// Fabricated locally from a service-call event for a virtual entity.
    ServiceCall,
}

/// State of one hub entity at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub last_changed: String,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pub context: Attributes,
    /// Not on the wire; hub-decoded states are always [`StateOrigin::Hub`].
    #[serde(skip)]
    pub origin: StateOrigin,
}

impl EntityState {
    /// Builds a locally synthesized state stamped with the current time.
    ///
    /// The context carries `from_service_call: true` so consumers that only
    /// see the JSON form can still tell it apart from a hub push.
    pub fn synthesized(
        entity_id: impl Into<String>,
        state: impl Into<String>,
        attributes: Attributes,
    ) -> Self {
        let now = chrono::Utc::now();
        let stamp = now.to_rfc3339();
        let mut context = Attributes::new();
        context.insert(
            "id".into(),
            format!("service_call_{}", now.timestamp_millis()).into(),
        );
        context.insert("from_service_call".into(), true.into());
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes,
            last_changed: stamp.clone(),
            last_updated: stamp,
            context,
            origin: StateOrigin::ServiceCall,
        }
    }

    /// Domain part of the entity id (`light` for `light.kitchen`).
    pub fn domain(&self) -> &str {
        self.entity_id
            .split_once('.')
            .map(|(domain, _)| domain)
            .unwrap_or(&self.entity_id)
    }

    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }

    /// Brightness attribute (0-255), if present and numeric.
    pub fn brightness(&self) -> Option<u8> {
        self.attribute("brightness")
            .and_then(serde_json::Value::as_f64)
            .map(|b| b.round().clamp(0.0, 255.0) as u8)
    }

    pub fn is_on(&self) -> bool {
        self.state == "on"
    }

    pub fn is_synthesized(&self) -> bool {
        self.origin == StateOrigin::ServiceCall
    }
}

/// State value and attributes pushed to the hub for one entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateReport {
    pub state: serde_json::Value,
    #[serde(default)]
    pub attributes: Attributes,
}

impl StateReport {
    pub fn new(state: impl Into<serde_json::Value>, attributes: Attributes) -> Self {
        Self {
            state: state.into(),
            attributes,
        }
    }
}

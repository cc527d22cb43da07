fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use linkmate_ha_connection::VirtualEntities;
    use linkmate_protocol::{
        EntityState, InboundMessage, OutboundMessage, ServiceCallEvent, ServiceCallParams,
    };

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Loads a fixture as the raw text frame the hub would send.
    fn load_frame(name: &str) -> InboundMessage {
        let text = load_fixture(name).to_string();
        InboundMessage::parse(&text).unwrap_or_else(|e| panic!("failed to parse frame {name}: {e}"))
    }

    /// Normalizes JSON values so that integer-valued floats compare equal.
    fn normalize_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => serde_json::json!(f),
                None => v.clone(),
            },
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect(),
            ),
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(normalize_value).collect())
            }
            _ => v.clone(),
        }
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (order-independent, float-normalized comparison).
    fn roundtrip_test<T>(name: &str)
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            normalize_value(&fixture),
            normalize_value(&reserialized),
            "roundtrip mismatch for {name}:\n  hub:  {fixture}\n  ours: {reserialized}"
        );
    }

    // --- Outbound frames ---

    #[test]
    fn fixture_auth() {
        roundtrip_test::<OutboundMessage>("auth.json");
    }

    #[test]
    fn fixture_subscribe_events() {
        roundtrip_test::<OutboundMessage>("subscribe_events.json");
    }

    #[test]
    fn fixture_call_service() {
        roundtrip_test::<OutboundMessage>("call_service.json");
    }

    #[test]
    fn fixture_set_state() {
        roundtrip_test::<OutboundMessage>("set_state.json");
        let msg: OutboundMessage = serde_json::from_value(load_fixture("set_state.json")).unwrap();
        match msg {
            OutboundMessage::CallService {
                domain,
                service,
                service_data,
                ..
            } => {
                assert_eq!((domain.as_str(), service.as_str()), ("states", "set_state"));
                assert_eq!(service_data["entity_id"], "sensor.a1b2c3d4_battery_level");
            }
            other => panic!("expected call_service, got {other:?}"),
        }
    }

    #[test]
    fn ping_frame_shape() {
        let json = OutboundMessage::Ping { id: 19 }.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value, serde_json::json!({"id": 19, "type": "ping"}));
    }

    // --- Inbound frames ---

    #[test]
    fn fixture_auth_handshake_frames() {
        roundtrip_test::<InboundMessage>("auth_required.json");
        roundtrip_test::<InboundMessage>("auth_ok.json");
        roundtrip_test::<InboundMessage>("auth_invalid.json");

        assert_eq!(
            load_frame("auth_ok.json"),
            InboundMessage::AuthOk {
                ha_version: Some("2024.5.1".into())
            }
        );
    }

    #[test]
    fn fixture_pong() {
        roundtrip_test::<InboundMessage>("pong.json");
        assert_eq!(load_frame("pong.json"), InboundMessage::Pong { id: 19 });
    }

    #[test]
    fn fixture_result_error() {
        roundtrip_test::<InboundMessage>("result_error.json");
        match load_frame("result_error.json") {
            InboundMessage::Result {
                id, success, error, ..
            } => {
                assert_eq!(id, 12);
                assert!(!success);
                let error = error.unwrap();
                assert_eq!(error.code, "not_found");
                assert_eq!(error.message, "Service light.explode not found.");
            }
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[test]
    fn fixture_result_get_states() {
        roundtrip_test::<InboundMessage>("result_get_states.json");
        let InboundMessage::Result {
            success, result, ..
        } = load_frame("result_get_states.json")
        else {
            panic!("expected result frame");
        };
        assert!(success);
        let states: Vec<EntityState> = serde_json::from_value(result.unwrap()).unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].entity_id, "light.kitchen");
        assert_eq!(states[0].brightness(), Some(180));
        assert_eq!(states[1].domain(), "sun");
        assert!(states.iter().all(|s| !s.is_synthesized()));
    }

    #[test]
    fn fixture_event_state_changed() {
        let InboundMessage::Event { id, event } = load_frame("event_state_changed.json") else {
            panic!("expected event frame");
        };
        assert_eq!(id, Some(1));
        assert_eq!(event.event_type, "state_changed");
        let new_state: EntityState =
            serde_json::from_value(event.data["new_state"].clone()).unwrap();
        assert_eq!(new_state.state, "on");
        assert_eq!(new_state.context["id"], "01HWXYZ");
    }

    #[test]
    fn fixture_event_call_service_synthesizes_virtual_light() {
        let InboundMessage::Event { event, .. } = load_frame("event_call_service.json") else {
            panic!("expected event frame");
        };
        assert_eq!(event.event_type, "call_service");

        let call = ServiceCallEvent::from_event_data(&event.data).unwrap();
        assert_eq!(call.params(), ServiceCallParams::LightTurnOn { brightness: 128 });

        let state = VirtualEntities::for_device("a1b2c3d4")
            .synthesize(&call)
            .expect("virtual light should be synthesized");
        assert_eq!(state.entity_id, "light.a1b2c3d4_screen_brightness");
        assert_eq!(state.state, "on");
        assert_eq!(state.brightness(), Some(128));
        assert!(state.is_synthesized());
    }
}

use serde::{Deserialize, Serialize};

use crate::constants::WS_MAX_MESSAGE_SIZE;
use crate::error::ProtocolError;
use crate::types::Attributes;

/// Error details carried by a failed `result` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Body of an `event` frame: the event type plus its untyped data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Frames sent from the client to the hub.
///
/// Every variant except [`OutboundMessage::Auth`] carries a correlation id
/// that the hub echoes back in its `result` (or `pong`) frame.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Auth {
        access_token: String,
    },
    SubscribeEvents {
        id: u64,
        event_type: String,
    },
    GetStates {
        id: u64,
    },
    CallService {
        id: u64,
        domain: String,
        service: String,
        service_data: Attributes,
    },
    Ping {
        id: u64,
    },
}

impl OutboundMessage {
    /// Returns the correlation id, if this frame carries one.
    pub fn id(&self) -> Option<u64> {
        match self {
            Self::Auth { .. } => None,
            Self::SubscribeEvents { id, .. }
            | Self::GetStates { id }
            | Self::CallService { id, .. }
            | Self::Ping { id } => Some(*id),
        }
    }

    /// Wire name of the frame type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::SubscribeEvents { .. } => "subscribe_events",
            Self::GetStates { .. } => "get_states",
            Self::CallService { .. } => "call_service",
            Self::Ping { .. } => "ping",
        }
    }

    /// Serialises the frame to its JSON text form.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

// The access token must never reach a log line.
impl std::fmt::Debug for OutboundMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth { .. } => f
                .debug_struct("Auth")
                .field("access_token", &"<redacted>")
                .finish(),
            Self::SubscribeEvents { id, event_type } => f
                .debug_struct("SubscribeEvents")
                .field("id", id)
                .field("event_type", event_type)
                .finish(),
            Self::GetStates { id } => f.debug_struct("GetStates").field("id", id).finish(),
            Self::CallService {
                id,
                domain,
                service,
                service_data,
            } => f
                .debug_struct("CallService")
                .field("id", id)
                .field("domain", domain)
                .field("service", service)
                .field("service_data", service_data)
                .finish(),
            Self::Ping { id } => f.debug_struct("Ping").field("id", id).finish(),
        }
    }
}

/// Frames received from the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    AuthRequired {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ha_version: Option<String>,
    },
    AuthOk {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ha_version: Option<String>,
    },
    AuthInvalid {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Result {
        id: u64,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ResultError>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
    Event {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        event: EventPayload,
    },
    Pong {
        id: u64,
    },
    /// Forward compatibility: unknown frame types deserialize here.
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    /// Parses one text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        if text.len() > WS_MAX_MESSAGE_SIZE {
            return Err(ProtocolError::Oversized(text.len()));
        }
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn auth_frame_shape() {
        let msg = OutboundMessage::Auth {
            access_token: "secret".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "auth", "access_token": "secret"}));
        assert_eq!(msg.id(), None);
    }

    #[test]
    fn auth_debug_redacts_token() {
        let msg = OutboundMessage::Auth {
            access_token: "secret".into(),
        };
        let debug = format!("{msg:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn call_service_frame_shape() {
        let mut data = Attributes::new();
        data.insert("entity_id".into(), json!("light.kitchen"));
        let msg = OutboundMessage::CallService {
            id: 7,
            domain: "light".into(),
            service: "turn_on".into(),
            service_data: data,
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "id": 7,
                "type": "call_service",
                "domain": "light",
                "service": "turn_on",
                "service_data": {"entity_id": "light.kitchen"}
            })
        );
        assert_eq!(msg.id(), Some(7));
        assert_eq!(msg.kind(), "call_service");
    }

    #[test]
    fn parses_auth_invalid_with_and_without_message() {
        let msg = InboundMessage::parse(r#"{"type":"auth_invalid","message":"bad token"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::AuthInvalid {
                message: Some("bad token".into())
            }
        );
        let msg = InboundMessage::parse(r#"{"type":"auth_invalid"}"#).unwrap();
        assert_eq!(msg, InboundMessage::AuthInvalid { message: None });
    }

    #[test]
    fn parses_failed_result() {
        let msg = InboundMessage::parse(
            r#"{"id":4,"type":"result","success":false,"error":{"code":"not_found","message":"Service not found."}}"#,
        )
        .unwrap();
        match msg {
            InboundMessage::Result {
                id,
                success,
                error,
                result,
            } => {
                assert_eq!(id, 4);
                assert!(!success);
                assert_eq!(error.unwrap().message, "Service not found.");
                assert!(result.is_none());
            }
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[test]
    fn parses_event() {
        let msg = InboundMessage::parse(
            r#"{"id":1,"type":"event","event":{"event_type":"state_changed","data":{"entity_id":"sun.sun"}}}"#,
        )
        .unwrap();
        match msg {
            InboundMessage::Event { id, event } => {
                assert_eq!(id, Some(1));
                assert_eq!(event.event_type, "state_changed");
                assert_eq!(event.data["entity_id"], "sun.sun");
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_tolerated() {
        let msg = InboundMessage::parse(r#"{"type":"something_new","id":3}"#).unwrap();
        assert_eq!(msg, InboundMessage::Unknown);
    }

    #[test]
    fn malformed_frame_is_an_error() {
        assert!(matches!(
            InboundMessage::parse("not json {{"),
            Err(ProtocolError::Json(_))
        ));
        assert!(InboundMessage::parse(r#"{"id":1}"#).is_err());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let huge = "x".repeat(WS_MAX_MESSAGE_SIZE + 1);
        assert!(matches!(
            InboundMessage::parse(&huge),
            Err(ProtocolError::Oversized(_))
        ));
    }
}

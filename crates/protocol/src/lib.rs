//! Wire protocol types for the LinkMate hub connection.
//!
//! Covers the JSON frames exchanged with a home-automation hub over its
//! WebSocket API, the entity-state model, and parsing of service-call
//! events into typed parameter shapes.

pub mod constants;
pub mod envelope;
pub mod error;
pub mod service_call;
pub mod types;

pub use envelope::{EventPayload, InboundMessage, OutboundMessage, ResultError};
pub use error::ProtocolError;
pub use service_call::{ServiceCallEvent, ServiceCallParams};
pub use types::{Attributes, EntityState, StateOrigin, StateReport};

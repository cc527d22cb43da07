//! Persistent WebSocket client for a home-automation hub.
//!
//! Handles the authentication handshake, event subscriptions, request
//! correlation, keepalive and automatic reconnection, and publishes entity
//! states (including states synthesized for the device's own virtual
//! entities) as streams.

mod client;
mod correlator;
mod dispatcher;
pub mod error;
mod gate;
mod pumps;
mod session;
pub mod subscription;
mod supervisor;
pub mod synthesis;
mod tls;
pub mod transport;
pub mod types;

pub use client::{ActionHandle, HaClient};
pub use error::{CancelCause, HaError};
pub use subscription::SubscriptionKind;
pub use synthesis::{VirtualEntities, VirtualKind};
pub use transport::{Transport, TungsteniteTransport, WsSink, WsStream};
pub use types::{ClientConfig, ConnectParams, ConnectionState};

//! Public types for the hub connection.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use linkmate_protocol::constants::{
    AUTH_RETRY_ATTEMPTS, AUTH_RETRY_DELAY, LIVENESS_TIMEOUT, PING_PERIOD, RECONNECT_DELAY,
};

use crate::synthesis::VirtualEntities;

/// Lifecycle state of the hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket and none pending (never connected, disconnected, or
    /// waiting for the scheduled reconnect).
    #[default]
    Idle,
    /// Socket open in progress.
    Connecting,
    /// Socket open, waiting for `auth_ok`.
    AuthPending,
    /// Authenticated, waiting for both event subscriptions to be acknowledged.
    SubscribePending,
    /// Authenticated and subscribed.
    Ready,
    /// User-initiated close in progress.
    Closing,
    /// The hub rejected the credential. Terminal until the next `connect`.
    AuthFailed,
}

impl ConnectionState {
    /// True while a socket is open or being opened.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::AuthPending | Self::SubscribePending | Self::Ready
        )
    }
}

/// Endpoint and credential for one logical connection.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectParams {
    /// Hub base URL, e.g. `http://homeassistant.local:8123`.
    pub base_url: String,
    pub access_token: String,
}

impl ConnectParams {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            access_token: access_token.into(),
        }
    }
}

impl std::fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectParams")
            .field("base_url", &self.base_url)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Tunables for [`HaClient`](crate::HaClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Delay before the single reconnect attempt after an unexpected close.
    pub reconnect_delay: Duration,
    /// Keepalive period while the connection is ready.
    pub ping_period: Duration,
    /// Read deadline; silence for this long closes the connection.
    pub liveness_timeout: Duration,
    /// How many times an outbound call re-awaits a cancelled authentication.
    pub auth_retry_attempts: u32,
    pub auth_retry_delay: Duration,
    /// Optional per-request deadline. `None` waits until the result
    /// arrives or the connection closes.
    pub request_timeout: Option<Duration>,
    /// Capacity of the outbound frame queue.
    pub outbound_buffer: usize,
    /// Entities whose state is synthesized from service-call events.
    pub virtual_entities: VirtualEntities,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: RECONNECT_DELAY,
            ping_period: PING_PERIOD,
            liveness_timeout: LIVENESS_TIMEOUT,
            auth_retry_attempts: AUTH_RETRY_ATTEMPTS,
            auth_retry_delay: AUTH_RETRY_DELAY,
            request_timeout: None,
            outbound_buffer: 256,
            virtual_entities: VirtualEntities::default(),
        }
    }
}

impl ClientConfig {
    /// Default configuration with the virtual entities of `device_id`.
    pub fn for_device(device_id: &str) -> Self {
        Self {
            virtual_entities: VirtualEntities::for_device(device_id),
            ..Self::default()
        }
    }
}

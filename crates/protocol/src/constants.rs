use std::time::Duration;

/// Path appended to the hub base URL to reach the WebSocket API.
pub const WS_API_PATH: &str = "/api/websocket";

/// Delay before a single reconnect attempt after an unexpected close.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// How often a keepalive `ping` is sent while the connection is ready.
pub const PING_PERIOD: Duration = Duration::from_secs(30);

/// Read deadline: if nothing at all arrives within this window (no pong,
/// no result, no event) the connection is considered dead.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(90);

/// How many times an outbound call re-awaits authentication that was
/// cancelled by a concurrent reconnect before giving up.
pub const AUTH_RETRY_ATTEMPTS: u32 = 3;

/// Pause between authentication re-await attempts.
pub const AUTH_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Maximum inbound frame size in bytes (16 MB). Full snapshots of large
/// installations run to several megabytes.
pub const WS_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Close code sent on a graceful, client-initiated close.
pub const WS_CLOSE_NORMAL: u16 = 1000;

/// Event type of entity state pushes.
pub const EVENT_STATE_CHANGED: &str = "state_changed";

/// Event type the hub uses for service invocations.
pub const EVENT_CALL_SERVICE: &str = "call_service";

/// Alternate spelling of [`EVENT_CALL_SERVICE`] accepted on inbound events.
pub const EVENT_SERVICE_CALL: &str = "service_call";

/// Message used when an `auth_invalid` frame carries no text.
pub const DEFAULT_AUTH_INVALID_MESSAGE: &str = "Invalid access token or password";

/// Maps a hub base URL onto its WebSocket API URL.
///
/// `https` becomes `wss`, `http` becomes `ws`, any other scheme is left
/// alone. A trailing slash is trimmed before [`WS_API_PATH`] is appended.
pub fn websocket_url(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    let mapped = if let Some(rest) = strip_scheme(trimmed, "https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = strip_scheme(trimmed, "http://") {
        format!("ws://{rest}")
    } else {
        trimmed.to_string()
    };
    format!("{mapped}{WS_API_PATH}")
}

fn strip_scheme<'a>(url: &'a str, scheme: &str) -> Option<&'a str> {
    let head = url.get(..scheme.len())?;
    if head.eq_ignore_ascii_case(scheme) {
        Some(&url[scheme.len()..])
    } else {
        None
    }
}

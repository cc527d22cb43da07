use linkmate_protocol::ProtocolError;
use tokio_tungstenite::tungstenite;

/// Why pending work was cancelled. Lets callers tell a dropped connection
/// apart from a deliberate shutdown or a rejected credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelCause {
    /// The socket closed or failed.
    ConnectionClosed(String),
    /// A newer connection replaced this one.
    Superseded,
    /// `disconnect` was called.
    UserDisconnected,
    /// The hub answered `auth_invalid`.
    AuthRejected(String),
    /// The subscription round was restarted on the live connection.
    Resubscribing,
    /// The caller aborted an action handle.
    Aborted,
}

impl std::fmt::Display for CancelCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionClosed(reason) => write!(f, "connection closed: {reason}"),
            Self::Superseded => f.write_str("superseded by a new connection"),
            Self::UserDisconnected => f.write_str("disconnected by user"),
            Self::AuthRejected(message) => write!(f, "authentication rejected: {message}"),
            Self::Resubscribing => f.write_str("re-subscribing"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// Errors surfaced by the hub client.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HaError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("hub error ({code}): {message}")]
    Request { code: String, message: String },

    #[error("cancelled: {0}")]
    Cancelled(CancelCause),

    #[error("request timed out")]
    Timeout,

    #[error("not connected")]
    NotConnected,
}

impl HaError {
    /// True for failures a later attempt on a fresh connection may fix.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::NotConnected => true,
            Self::Cancelled(cause) => !matches!(
                cause,
                CancelCause::UserDisconnected | CancelCause::AuthRejected(_) | CancelCause::Aborted
            ),
            Self::Auth(_) | Self::Protocol(_) | Self::Request { .. } => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

impl From<tungstenite::Error> for HaError {
    fn from(e: tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<ProtocolError> for HaError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e.to_string())
    }
}

impl From<serde_json::Error> for HaError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}
